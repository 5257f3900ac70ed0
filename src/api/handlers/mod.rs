pub mod admin;
pub mod auth;
pub mod evaluations;
pub mod notifications;
pub mod payments;
pub mod profiles;
pub mod root;
