pub mod origin;

pub use origin::ClientOrigin;
