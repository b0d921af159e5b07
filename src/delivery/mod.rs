//! Delivery and redelivery submission

pub mod resend;
pub mod submit;

pub use resend::{RedeliverySubmitter, ResendOptions};
pub use submit::DeliverySubmitter;
