mod progress;
mod support;
mod variations;
