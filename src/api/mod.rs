pub mod health_controller;
pub mod ticket_stream_controller;
