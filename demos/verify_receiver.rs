use webhook_courier::{parse_header_value, sign, verify, SignatureAlgorithm};

fn main() {
    let secret = b"supersecret";
    let body = br#"{"event":"booking.created","payload":{"booking_id":123}}"#;

    // What the sender puts on the wire.
    let digest = sign(secret, body, SignatureAlgorithm::Sha256);
    let header = webhook_courier::header_value(&digest, SignatureAlgorithm::Sha256);
    println!("X-Webhook-Signature: {}", header);

    // What a receiver does with it.
    let (algorithm, received) = parse_header_value(&header).expect("well-formed header");
    if verify(secret, body, algorithm, received) {
        println!("signature ok");
    } else {
        println!("signature mismatch");
    }
}
