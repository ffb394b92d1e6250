mod redelivery;
mod stock_conservation;
