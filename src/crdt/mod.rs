pub mod convergent;
