pub mod installment;
pub mod message;
