pub mod appointment_reader;
