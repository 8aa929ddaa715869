mod command_test;
#[cfg(unix)]
mod process_test;
#[cfg(unix)]
mod stream_test;
