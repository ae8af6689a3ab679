pub mod checkout;
pub mod discount_codes;
pub mod orders;
pub mod payments;

pub use checkout::CheckoutService;
pub use discount_codes::DiscountCodeService;
pub use orders::OrderService;
pub use payments::PaymentService;
