pub mod observe;
pub mod relay;
