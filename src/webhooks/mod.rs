pub mod ebay;
