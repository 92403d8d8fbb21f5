use ed25519_dalek::SigningKey;

use certkit_agent::identity::{
    create_new_keypair, decode_private_key, decode_public_key, encode, IdentityError, KeyPair,
};

const SEED_HEX: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

fn seed() -> [u8; 32] {
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&SEED_HEX[i * 2..i * 2 + 2], 16).unwrap();
    }
    out
}

#[test]
fn test_known_seed_encoding() {
    let kp = KeyPair::from_signing_key(&SigningKey::from_bytes(&seed()));

    assert_eq!(kp.public_key, "11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo");
    assert_eq!(
        kp.private_key,
        "nWGxne_9WmC6hEr0kuwsxERJxWl7MmkZcDusAxyuf2DXWpgBgrEKt9VL_tPJZAc6DuFy89qmIyWvAhpo9wdRGg"
    );
    assert_eq!(&kp.private_key_bytes().unwrap()[..32], &seed()[..]);
}

#[test]
fn test_generated_keypair_round_trips_through_json() {
    let kp = create_new_keypair().unwrap();
    let json = serde_json::to_string(&kp).unwrap();
    let back: KeyPair = serde_json::from_str(&json).unwrap();

    assert_eq!(back, kp);
    assert_eq!(
        back.signing_key().unwrap().verifying_key(),
        kp.verifying_key().unwrap()
    );
}

#[test]
fn test_lengths_enforced() {
    for len in [0usize, 31, 33, 64] {
        assert!(matches!(
            decode_public_key(&encode(&vec![1u8; len])),
            Err(IdentityError::InvalidLength { expected: 32, .. })
        ));
    }
    for len in [32usize, 63, 65] {
        assert!(matches!(
            decode_private_key(&encode(&vec![1u8; len])),
            Err(IdentityError::InvalidLength { expected: 64, .. })
        ));
    }
}

#[test]
fn test_debug_hides_private_key() {
    let kp = create_new_keypair().unwrap();
    let rendered = format!("{:?}", kp);
    assert!(rendered.contains(&kp.public_key));
    assert!(!rendered.contains(&kp.private_key));
}
