pub mod core;

pub use self::core::errors::CoreError;
pub use self::core::service::IntakeService;
