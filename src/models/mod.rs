mod booking;
mod rent_payment;
mod transaction;

pub use booking::{Booking, Host, ListingSummary, Renter};
pub use rent_payment::{
    ChargeCategory, DuePayment, PaymentChargeLine, PaymentStatus, RentPayment,
};
pub use transaction::{NewPaymentTransaction, PaymentTransaction, TransactionStatus};
