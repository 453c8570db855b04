pub mod fake_runtime;
