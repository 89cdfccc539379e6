use bytesstr::BytesStr;
use rand::{Rng, distr::Alphanumeric, rng};

/// Random alphanumeric token, used for tags and Call-IDs
pub fn random_string() -> BytesStr {
    rng()
        .sample_iter(Alphanumeric)
        .take(30)
        .map(char::from)
        .collect::<String>()
        .into()
}

/// Initial CSeq number, kept below 2**31 as RFC 3261 requires
pub fn random_sequence_number() -> u32 {
    rng().random_range(0..(u32::MAX >> 1))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequence_number_range() {
        for _ in 0..100 {
            assert!(random_sequence_number() < 1 << 31);
        }
    }

    #[test]
    fn tokens_differ() {
        assert_ne!(random_string(), random_string());
        assert_eq!(random_string().len(), 30);
    }
}
