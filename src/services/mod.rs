pub mod cart;
pub mod checkout;
pub mod order_history;
pub mod payments;
pub mod prescription;

pub use cart::{CartLineView, CartService, CartView};
pub use checkout::{
    CheckoutService, CheckoutSettings, PaymentOrder, PlaceOrderRequest, PlacedOrder,
};
pub use order_history::OrderHistoryService;
pub use prescription::{PendingPrescriptionLine, PrescriptionService};
