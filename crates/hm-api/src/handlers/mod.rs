pub mod companies;
pub mod health;
pub mod pagination;
pub mod search;
