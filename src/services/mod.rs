pub mod checkout;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod settlement;
pub mod webhooks;
