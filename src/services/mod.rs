pub mod cart;
pub mod checkout;
pub mod orders;

pub use cart::{CartService, CartSummary};
pub use checkout::{CheckoutService, CheckoutUrls};
pub use orders::{ConfirmationOutcome, OrderService, SessionOutcome};
