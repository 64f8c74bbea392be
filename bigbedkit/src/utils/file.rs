pub mod read_at;
