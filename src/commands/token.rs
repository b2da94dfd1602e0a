use crate::cryptography::create_token;

/// Prints a new random token for use with `serve --token` and `fetch --token`.
pub fn run() {
    println!("{}", create_token());
}
