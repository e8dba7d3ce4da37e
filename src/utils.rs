use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;

/// Passwords are stored and compared verbatim; there is no hashing.
pub fn verify_password(provided: &str, stored: &str) -> bool {
    provided == stored
}

pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_or(false, |re| re.is_match(email))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn random_uppercase(len: usize) -> String {
    const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| LETTERS[rng.gen_range(0..LETTERS.len())] as char)
        .collect()
}

pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
