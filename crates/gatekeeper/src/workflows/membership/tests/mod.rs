mod common;
mod correlation;
mod domain;
