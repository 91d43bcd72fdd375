pub mod gifts;
pub mod payments;
pub mod webhooks;
