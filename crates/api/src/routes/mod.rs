pub mod cart_summaries;
pub mod carts;
pub mod dead_letters;
pub mod health;
pub mod metrics;
pub mod products;
