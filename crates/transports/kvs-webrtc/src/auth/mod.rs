//! Request authentication for the signaling service

pub mod sigv4;

pub use sigv4::SigV4Signer;
