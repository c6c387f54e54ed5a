pub mod dashboard;
pub mod health;
pub mod live;
pub mod settings;
