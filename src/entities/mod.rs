pub mod checkout_session;
pub mod discount_code;
pub mod item_status;
pub mod mailbox;
pub mod order;
pub mod payment;
pub mod payment_method;
pub mod reputation_case;
pub mod site;
pub mod social_profile;
pub mod user;

pub use checkout_session::Entity as CheckoutSession;
pub use discount_code::Entity as DiscountCode;
pub use item_status::ItemStatus;
pub use mailbox::Entity as Mailbox;
pub use order::Entity as Order;
pub use payment::Entity as Payment;
pub use payment_method::Entity as PaymentMethod;
pub use reputation_case::Entity as ReputationCase;
pub use site::Entity as Site;
pub use social_profile::Entity as SocialProfile;
pub use user::Entity as User;
