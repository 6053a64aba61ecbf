pub mod chunking;
pub mod jwt;
