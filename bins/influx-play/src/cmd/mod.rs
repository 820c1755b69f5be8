pub mod listen;
pub mod replay;
