use super::{memorystore, HttpTransport, Result, Transport, WireRequest, WireResponse};

/// The transports this crate ships, behind one concrete type so that clients can switch between
/// them at runtime.
#[derive(Clone)]
#[non_exhaustive]
pub enum DynTransport {
    Http(HttpTransport),
    Memory(memorystore::Backend),
}

/// Delegates to each supported transport via identical expressions.
///
/// Rust doesn't allow macros to reference variables not passed into them or exprs passed into
/// macros to reference variables defined in the macro. Thus, `self` and `transport` must be
/// supplied as parameters.
macro_rules! dispatch {
    ($self:ident, $transport:ident, { $expansion:expr }) => {
        match $self {
            Self::Http($transport) => $expansion,
            Self::Memory($transport) => $expansion,
        }
        .await
    };
}

#[async_trait]
impl Transport for DynTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        dispatch!(self, transport, { transport.send(request) })
    }
}

impl From<HttpTransport> for DynTransport {
    fn from(t: HttpTransport) -> Self {
        Self::Http(t)
    }
}

impl From<memorystore::Backend> for DynTransport {
    fn from(b: memorystore::Backend) -> Self {
        Self::Memory(b)
    }
}

#[cfg(test)]
mod test {
    mod backend {
        use crate::{backendtest, memorystore, test_client, Client, ClientConfig, DynTransport};
        test_client!(|| async {
            let c = Client::with_transport(ClientConfig::default(), DynTransport::from(memorystore::Backend::new())).unwrap();
            backendtest::prepare(&c).await.unwrap();
            Some(c)
        });
    }
}
