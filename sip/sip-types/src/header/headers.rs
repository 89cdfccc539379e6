use super::{ConstNamed, HeaderError, HeaderParse};
use crate::header::name::Name;
use anyhow::anyhow;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::Finish;
use std::fmt;

/// Ordered multimap of SIP header values.
///
/// Values are stored as [`BytesStr`] under their [`Name`] in insertion order.
/// Typed access parses the raw values on demand.
#[derive(Debug, Default, Clone)]
pub struct Headers {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    name: Name,
    value: BytesStr,
}

impl Headers {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Headers {
            entries: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn contains(&self, name: &Name) -> bool {
        self.entries.iter().any(|entry| &entry.name == name)
    }

    /// Append a raw header value
    pub fn insert<N, V>(&mut self, name: N, value: V)
    where
        N: Into<Name>,
        V: Into<BytesStr>,
    {
        self.entries.push(Entry {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Insert a raw header value in front of all others
    pub fn insert_front<N, V>(&mut self, name: N, value: V)
    where
        N: Into<Name>,
        V: Into<BytesStr>,
    {
        self.entries.insert(
            0,
            Entry {
                name: name.into(),
                value: value.into(),
            },
        );
    }

    /// Append a typed header under its constant name
    pub fn insert_named<H: ConstNamed + fmt::Display>(&mut self, header: &H) {
        self.insert_type(H::NAME, header)
    }

    /// Insert a typed header under its constant name in front of all others
    pub fn insert_named_front<H: ConstNamed + fmt::Display>(&mut self, header: &H) {
        self.insert_front(H::NAME, header.to_string())
    }

    /// Append a typed header under `name`
    pub fn insert_type<H: fmt::Display>(&mut self, name: Name, header: &H) {
        self.insert(name, header.to_string())
    }

    /// Remove all values with the given name, returning them in order
    pub fn remove(&mut self, name: &Name) -> Vec<BytesStr> {
        let mut removed = vec![];

        self.entries.retain(|entry| {
            if &entry.name == name {
                removed.push(entry.value.clone());
                false
            } else {
                true
            }
        });

        removed
    }

    /// Iterator over all raw values with the given name
    pub fn values<'s>(&'s self, name: &'s Name) -> impl Iterator<Item = &'s BytesStr> + 's {
        self.entries
            .iter()
            .filter(move |entry| &entry.name == name)
            .map(|entry| &entry.value)
    }

    /// Returns the parsed header `H`, taken from the first value
    pub fn get_named<H: ConstNamed + HeaderParse>(&self) -> Result<H, HeaderError> {
        self.get(H::NAME)
    }

    /// Like [`Headers::get_named`], returns `None` instead of an error if the header is missing
    pub fn try_get_named<H: ConstNamed + HeaderParse>(&self) -> Option<Result<H, HeaderError>> {
        self.try_get(H::NAME)
    }

    /// Returns all comma separated values of `H` over all header lines
    pub fn get_all_named<H: ConstNamed + HeaderParse>(&self) -> Result<Vec<H>, HeaderError> {
        self.get_all(H::NAME)
    }

    /// Parse the first value with the given name and remove all of them
    pub fn take_named<H: ConstNamed + HeaderParse>(&mut self) -> Option<Result<H, HeaderError>> {
        let parsed = self.try_get(H::NAME)?;
        self.remove(&H::NAME);
        Some(parsed)
    }

    pub fn get<H: HeaderParse>(&self, name: Name) -> Result<H, HeaderError> {
        match self.try_get(name.clone()) {
            Some(res) => res,
            None => Err(HeaderError::missing(name)),
        }
    }

    pub fn try_get<H: HeaderParse>(&self, name: Name) -> Option<Result<H, HeaderError>> {
        let value = self.values(&name).next()?;

        Some(
            decode_one::<H>(value.as_ref(), value.as_str())
                .map(|(_, header)| header)
                .map_err(|e| HeaderError::malformed(name, e)),
        )
    }

    /// Returns all comma separated values of `H` with the given name. Missing headers yield an empty list.
    pub fn get_all<H: HeaderParse>(&self, name: Name) -> Result<Vec<H>, HeaderError> {
        let mut parsed = vec![];

        for value in self.values(&name) {
            let mut i = value.as_str();

            loop {
                let (rem, header) = decode_one::<H>(value.as_ref(), i)
                    .map_err(|e| HeaderError::malformed(name.clone(), e))?;

                parsed.push(header);

                match rem.strip_prefix(',') {
                    Some(next) => i = next.trim_start(),
                    None => break,
                }
            }
        }

        Ok(parsed)
    }

    /// Copy all values with `name` into `dst`
    pub fn clone_into(&self, dst: &mut Self, name: Name) -> Result<(), HeaderError> {
        if !self.contains(&name) {
            return Err(HeaderError::missing(name));
        }

        for value in self.values(&name) {
            dst.insert(name.clone(), value.clone());
        }

        Ok(())
    }

    /// Iterator over all name-value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &BytesStr)> + '_ {
        self.entries.iter().map(|entry| (&entry.name, &entry.value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode a single header value, returning the trimmed remainder after it
fn decode_one<'i, H: HeaderParse>(src: &'i Bytes, i: &'i str) -> anyhow::Result<(&'i str, H)> {
    let (rem, header) = H::parse(src, i)
        .finish()
        .map_err(|e| anyhow!("{:?}", internal::verbose_error_to_owned(e)))?;

    let rem = rem.trim();

    if !rem.is_empty() && !rem.starts_with(',') {
        return Err(anyhow!("unexpected trailing input {rem:?}"));
    }

    Ok((rem, header))
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in self.iter() {
            write!(f, "{}: {}\r\n", name.as_print_str(), value)?;
        }

        Ok(())
    }
}

impl Extend<(Name, BytesStr)> for Headers {
    fn extend<T: IntoIterator<Item = (Name, BytesStr)>>(&mut self, iter: T) {
        for (name, value) in iter {
            self.insert(name, value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::typed::{CSeq, Expires};
    use crate::method::Method;

    #[test]
    fn insertion_order_and_removal() {
        let mut headers = Headers::new();
        headers.insert(Name::VIA, "SIP/2.0/UDP a;branch=z9hG4bK1");
        headers.insert_named(&CSeq::new(1, Method::INVITE));
        headers.insert_front(Name::VIA, "SIP/2.0/UDP b;branch=z9hG4bK2");

        assert_eq!(
            headers.to_string(),
            "Via: SIP/2.0/UDP b;branch=z9hG4bK2\r\nVia: SIP/2.0/UDP a;branch=z9hG4bK1\r\nCSeq: 1 INVITE\r\n"
        );

        let removed = headers.remove(&Name::VIA);
        assert_eq!(removed.len(), 2);
        assert!(!headers.contains(&Name::VIA));
    }

    #[test]
    fn missing_header() {
        let headers = Headers::new();

        assert!(headers.get_named::<Expires>().unwrap_err().is_missing());
        assert!(headers.try_get_named::<Expires>().is_none());
        assert!(headers.get_all_named::<Expires>().unwrap().is_empty());
    }
}
