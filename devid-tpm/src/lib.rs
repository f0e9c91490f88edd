pub mod convert;
pub mod error;
pub mod gateway;
pub mod nvram;
pub mod policy;
pub mod resources;
pub mod templates;

pub use error::GatewayError;
pub use gateway::{SigningHandles, TpmGateway};
pub use nvram::NvramLayout;
pub use resources::RequestResources;
