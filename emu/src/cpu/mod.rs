#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_sign_loss)]
pub mod alu;
pub mod condition;

#[allow(clippy::cast_possible_truncation)]
pub mod core;
pub mod cp15;
pub mod exception;
pub mod flags;

#[allow(clippy::cast_possible_truncation)]
pub mod instruction;
pub mod modes;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::too_many_lines)]
pub mod operations;
pub mod psr;
pub mod register_bank;
pub mod registers;
