pub mod quick_mod;
