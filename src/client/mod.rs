#[cfg(feature = "blocking")]
pub(crate) mod blocking;

pub(crate) mod core;

#[cfg(feature = "async")]
pub(crate) mod tokio;

#[cfg(feature = "blocking")]
pub use blocking::{Client, ClientBuilder};

#[cfg(feature = "async")]
pub use self::tokio::{AsyncClient, AsyncClientBuilder};
