mod common;

mod correlation_tests;
mod sender_tests;
