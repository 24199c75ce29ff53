pub mod cart_line;
pub mod checkout_session;
pub mod order;
pub mod product;
