pub mod client;
pub mod mock;
pub mod paystack;
pub mod signature;
pub mod stripe;

pub use mock::MockGateway;
pub use paystack::PaystackGateway;
pub use stripe::StripeGateway;
