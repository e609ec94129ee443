use chrono::Utc;
use rand::Rng;

const SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 4;

/// `<prefix><unix millis><4 uppercase alphanumerics>`, e.g. `REF1718000000000K7QZ`.
fn generate(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}{}{}", prefix, Utc::now().timestamp_millis(), suffix)
}

pub fn order_number() -> String {
    generate("ORD")
}

pub fn payment_reference() -> String {
    generate("REF")
}

pub fn slip_code() -> String {
    generate("SLIP")
}
