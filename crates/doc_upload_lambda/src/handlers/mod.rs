pub mod issuer;
pub mod processor;
