use crate::IResult;

/// Sequence of parsers which may be separated by linear whitespace
pub trait WsSeq<'i, O> {
    fn parse_seq(&mut self, i: &'i str) -> IResult<&'i str, O>;
}

/// Run a tuple of parsers, skipping whitespace before each of them
#[inline]
pub fn ws<'i, O, S>(mut seq: S) -> impl FnMut(&'i str) -> IResult<&'i str, O>
where
    S: WsSeq<'i, O>,
{
    move |i| seq.parse_seq(i)
}

pub fn is_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

macro_rules! ws_seq {
    ($($parser:ident $out:ident $value:ident),+) => {
        impl<'i, $($out, $parser,)+> WsSeq<'i, ($($out,)+)> for ($($parser,)+)
        where
            $($parser: FnMut(&'i str) -> IResult<&'i str, $out>,)+
        {
            fn parse_seq(&mut self, i: &'i str) -> IResult<&'i str, ($($out,)+)> {
                let ($($parser,)+) = self;

                $(
                let i = i.trim_start_matches(is_ws);
                let (i, $value) = ($parser)(i)?;
                )+

                Ok((i, ($($value,)+)))
            }
        }
    };
}

ws_seq!(P1 O1 v1);
ws_seq!(P1 O1 v1, P2 O2 v2);
ws_seq!(P1 O1 v1, P2 O2 v2, P3 O3 v3);
ws_seq!(P1 O1 v1, P2 O2 v2, P3 O3 v3, P4 O4 v4);
ws_seq!(P1 O1 v1, P2 O2 v2, P3 O3 v3, P4 O4 v4, P5 O5 v5);
ws_seq!(P1 O1 v1, P2 O2 v2, P3 O3 v3, P4 O4 v4, P5 O5 v5, P6 O6 v6);

#[cfg(test)]
mod test {
    use super::ws;
    use nom::bytes::complete::tag;
    use nom::character::complete::digit1;

    #[test]
    fn skips_leading_whitespace() {
        let (rem, (a, _, b)) = ws((digit1, tag(":"), digit1))("  12 :\t34 rest").unwrap();

        assert_eq!(a, "12");
        assert_eq!(b, "34");
        assert_eq!(rem, " rest");
    }
}
