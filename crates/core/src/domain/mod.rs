pub mod action;
pub mod conversation;
pub mod reservation;
pub mod table;
