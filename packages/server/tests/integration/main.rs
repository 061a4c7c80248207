mod common;
mod uploads;
