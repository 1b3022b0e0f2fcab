pub mod assignment;
pub mod courier;
pub mod notification;
