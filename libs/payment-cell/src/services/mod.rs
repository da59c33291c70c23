pub mod checkout;
pub mod reconcile;
pub mod stripe;

pub use checkout::CheckoutService;
pub use reconcile::ReconciliationService;
pub use stripe::StripeClient;
