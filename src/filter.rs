/// Client-side handles for server-side stream predicates.
///
/// The client never evaluates a filter; it ships `(name, payload)` over the
/// wire and the server materializes the named predicate with the payload as
/// its parameters. Encoding happens before any socket is touched, so an
/// unencodable filter never costs a connection.
use crate::errors::Error;
use crate::proto;

pub trait StreamFilter: Send + Sync {
    /// Name the server resolves to a registered predicate.
    fn name(&self) -> &str;

    /// Opaque parameter blob shipped alongside the name.
    fn payload(&self) -> Result<Vec<u8>, Error>;
}

/// The common case: a registered predicate plus a fixed parameter blob.
#[derive(Clone, Debug)]
pub struct NamedFilter {
    name: String,
    payload: Vec<u8>,
}

impl NamedFilter {
    pub fn new(name: &str, payload: Vec<u8>) -> NamedFilter {
        NamedFilter {
            name: name.to_string(),
            payload,
        }
    }
}

impl StreamFilter for NamedFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn payload(&self) -> Result<Vec<u8>, Error> {
        Ok(self.payload.clone())
    }
}

pub(crate) fn encode_filter(filter: &dyn StreamFilter) -> Result<proto::StreamFilter, Error> {
    let data = filter
        .payload()
        .map_err(|err| Error::FilterEncode(err.to_string()))?;

    Ok(proto::StreamFilter {
        name: filter.name().to_string(),
        data,
    })
}
