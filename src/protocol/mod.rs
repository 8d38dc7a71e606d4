pub mod telescope;
pub mod tty;
