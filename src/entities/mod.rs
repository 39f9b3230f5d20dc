//! SeaORM entities for the pharmacy checkout schema.

pub mod cart;
pub mod cart_line;
pub mod medicine;
pub mod order;
pub mod order_history;
pub mod order_line;
pub mod payment_quote;
pub mod user;

pub use order::{OrderStatus, PaymentMethod, PaymentStatus, PrescriptionStatus};
pub use user::UserRole;
