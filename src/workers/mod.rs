pub mod ticket_sweeper;
