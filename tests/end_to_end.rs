//! End-to-end scenarios exercising the full send/receive path: data streams
//! encrypted, their data key wrapped per recipient, and both carried in an
//! `EncryptionInfo`, plus certificate trust. RSA key sizes are smaller than
//! a production deployment would use, to keep key generation fast; this
//! does not change any of the scenarios' expected outcomes.

use std::time::Duration;

use cryptarch::cert::{CaConstraint, Certificate, KeyUsage, Validity};
use cryptarch::dn::DistinguishedName;
use cryptarch::keyid::KeyIdentifier;
use cryptarch::{
    CaCertTrustValidator, DataDecryptor, DataEncryptor, DataMode, EcCurve, EncryptionInfo,
    Error, KeyDecryptor, KeyEncryptor, KeyPair, OsRandomSource, TrustValidator,
};

fn recipient(kp: &KeyPair) -> (KeyIdentifier, cryptarch::PublicKey) {
    (KeyIdentifier::compute(&kp.public), kp.public.clone())
}

fn seal(
    plaintext: &[u8],
    recipients: &[(KeyIdentifier, cryptarch::PublicKey)],
    allow_shared: bool,
) -> (Vec<u8>, EncryptionInfo) {
    let mut rng = OsRandomSource;
    let encryptor = DataEncryptor::new(&mut rng, 1, DataMode::Aes256Ccm);
    let ciphertext = encryptor.encrypt_data(plaintext, 0).unwrap();

    let key_encryptor = KeyEncryptor::new(recipients.to_vec(), allow_shared);
    let (data_keys, message_public_key) = key_encryptor
        .wrap(encryptor.data_key().unwrap(), &mut rng)
        .unwrap();

    let info = EncryptionInfo {
        data_mode: DataMode::Aes256Ccm,
        ivs: encryptor.ivs().to_vec(),
        data_keys,
        message_public_key,
    };
    (ciphertext, info)
}

fn open(ciphertext: &[u8], info: &EncryptionInfo, private_key: cryptarch::PrivateKey) -> Option<Vec<u8>> {
    let key_decryptor = KeyDecryptor::new(private_key);
    let decryptor = DataDecryptor::from_encryption_info(info, Some(&key_decryptor))?;
    Some(decryptor.decrypt_data(ciphertext, 0).unwrap())
}

#[test]
fn rsa_recipient_happy_path() {
    let mut rng = OsRandomSource;
    let r1 = KeyPair::generate_rsa(&mut rng, 2048).unwrap();
    let plaintext = vec![0u8; 256]
        .into_iter()
        .enumerate()
        .map(|(i, _)| (i % 256) as u8)
        .collect::<Vec<u8>>();

    let (ciphertext, info) = seal(&plaintext, &[recipient(&r1)], false);

    assert_eq!(info.data_keys.len(), 1);
    let entry = info.data_keys.values().next().unwrap();
    assert_eq!(entry.mode, cryptarch::KeyWrapMode::RsaPkcs1);
    assert_eq!(entry.encrypted_key.len(), 256);

    let decrypted = open(&ciphertext, &info, r1.private).unwrap();
    assert_eq!(decrypted, plaintext);
}

#[test]
fn shared_ec_ephemeral_key() {
    let mut rng = OsRandomSource;
    let ecs: Vec<_> = (0..4)
        .map(|_| KeyPair::generate_ec(&mut rng, EcCurve::P521).unwrap())
        .collect();
    let r1 = KeyPair::generate_rsa(&mut rng, 2048).unwrap();
    let plaintext = vec![0xAB; 4096];

    let mut recipients: Vec<_> = ecs.iter().map(recipient).collect();
    recipients.push(recipient(&r1));

    let (ciphertext, info) = seal(&plaintext, &recipients, true);

    assert!(info.message_public_key.is_some());
    let e1_id = KeyIdentifier::compute(&ecs[0].public);
    assert!(info.data_keys[&e1_id].message_public_key.is_none());
    let r1_id = KeyIdentifier::compute(&r1.public);
    assert!(info.data_keys[&r1_id].message_public_key.is_none());

    for kp in ecs.iter().chain(std::iter::once(&r1)) {
        let decrypted = open(&ciphertext, &info, kp.private.clone()).unwrap();
        assert_eq!(decrypted, plaintext);
    }
}

#[test]
fn ec_ineligibility_for_shared_key() {
    let mut rng = OsRandomSource;
    let e1 = KeyPair::generate_ec(&mut rng, EcCurve::P521).unwrap();
    let e2 = KeyPair::generate_ec(&mut rng, EcCurve::P521).unwrap();
    let e3 = KeyPair::generate_ec(&mut rng, EcCurve::P384).unwrap();
    let e4_named = KeyPair::generate_ec(&mut rng, EcCurve::P521).unwrap();
    let e4_explicit_public = cryptarch::PublicKey::Ec(cryptarch::key::EcPublicParams {
        explicit_params: true,
        ..e4_named.public.as_ec().unwrap().clone()
    });
    let plaintext = vec![0x11; 1024];

    let e4_id = KeyIdentifier::compute(&e4_explicit_public);
    let recipients = vec![
        recipient(&e1),
        recipient(&e2),
        recipient(&e3),
        (e4_id.clone(), e4_explicit_public),
    ];

    let (ciphertext, info) = seal(&plaintext, &recipients, true);

    assert!(info.message_public_key.is_some());
    let e1_id = KeyIdentifier::compute(&e1.public);
    let e2_id = KeyIdentifier::compute(&e2.public);
    let e3_id = KeyIdentifier::compute(&e3.public);
    assert!(info.data_keys[&e1_id].message_public_key.is_none());
    assert!(info.data_keys[&e2_id].message_public_key.is_none());
    assert!(info.data_keys[&e3_id].message_public_key.is_some());
    assert!(info.data_keys[&e4_id].message_public_key.is_some());
    assert_ne!(
        info.data_keys[&e3_id].message_public_key,
        info.data_keys[&e4_id].message_public_key
    );

    for kp in [&e1, &e2, &e3, &e4_named] {
        let decrypted = open(&ciphertext, &info, kp.private.clone()).unwrap();
        assert_eq!(decrypted, plaintext);
    }
}

#[test]
fn unauthorized_recipient_has_no_data_key() {
    let mut rng = OsRandomSource;
    let r1 = KeyPair::generate_rsa(&mut rng, 2048).unwrap();
    let r2 = KeyPair::generate_rsa(&mut rng, 2048).unwrap();
    let e1 = KeyPair::generate_ec(&mut rng, EcCurve::P256).unwrap();
    let plaintext = vec![0x22; 128];

    let (_ciphertext, info) = seal(&plaintext, &[recipient(&r1), recipient(&e1)], false);

    let key_decryptor = KeyDecryptor::new(r2.private);
    assert!(DataDecryptor::from_encryption_info(&info, Some(&key_decryptor)).is_none());
}

#[test]
fn tampered_ciphertext_fails_for_every_recipient() {
    let mut rng = OsRandomSource;
    let r1 = KeyPair::generate_rsa(&mut rng, 2048).unwrap();
    let e1 = KeyPair::generate_ec(&mut rng, EcCurve::P256).unwrap();
    let plaintext = vec![0x33; 2000];

    let (mut ciphertext, info) = seal(&plaintext, &[recipient(&r1), recipient(&e1)], false);
    ciphertext[1337] ^= 0x01;

    for kp in [r1.private, e1.private] {
        let key_decryptor = KeyDecryptor::new(kp);
        let decryptor = DataDecryptor::from_encryption_info(&info, Some(&key_decryptor)).unwrap();
        assert_eq!(
            decryptor.decrypt_data(&ciphertext, 0).unwrap_err(),
            Error::InvalidCiphertext
        );
    }
}

fn issue_ca(cn: &str) -> (KeyPair, Certificate) {
    let mut rng = OsRandomSource;
    let kp = KeyPair::generate_ec(&mut rng, EcCurve::P256).unwrap();
    let dn = DistinguishedName::new().push("cn", cn);
    let cert = Certificate::generate(
        &dn,
        &kp.private,
        &dn,
        &kp.public,
        Validity::for_duration(Duration::from_secs(3600)),
        &[1],
        &mut rng,
        None,
        true,
        Some(KeyUsage::KEY_CERT_SIGN),
        Some(CaConstraint {
            is_ca: true,
            path_len: None,
        }),
        None,
    )
    .unwrap();
    (kp, cert)
}

#[test]
fn certificate_invalidation() {
    let mut rng = OsRandomSource;
    let (ca1_kp, ca1_cert) = issue_ca("ca-1");
    let (_ca2_kp, ca2_cert) = issue_ca("ca-2");
    let (_ca3_kp, _ca3_cert) = issue_ca("ca-3-attacker");

    let leaf_kp = KeyPair::generate_ec(&mut rng, EcCurve::P256).unwrap();
    let leaf_dn = DistinguishedName::new().push("cn", "leaf");
    let mut cert1 = Certificate::generate(
        &DistinguishedName::new().push("cn", "ca-1"),
        &ca1_kp.private,
        &leaf_dn,
        &leaf_kp.public,
        Validity::for_duration(Duration::from_secs(3600)),
        &[2],
        &mut rng,
        Some(&KeyIdentifier::compute(&ca1_kp.public)),
        true,
        Some(KeyUsage::DIGITAL_SIGNATURE),
        None,
        None,
    )
    .unwrap();

    let mut writer = cryptarch::PemWriter::new();
    writer.push_certificate(&ca1_cert).unwrap();
    writer.push_certificate(&ca2_cert).unwrap();
    let validator = CaCertTrustValidator::from_pem(&writer.finish()).unwrap();

    assert!(validator.check(&cert1));

    // A certX forged by a CA outside the trust set, impersonating ca-1's
    // subject DN, still fails: AKID/SKID lookup picks ca-1's real key, and
    // the signature does not verify under it.
    let (attacker_kp, _attacker_cert) = issue_ca("attacker");
    let cert_x = Certificate::generate(
        &DistinguishedName::new().push("cn", "ca-1"),
        &attacker_kp.private,
        &DistinguishedName::new().push("cn", "forged-leaf"),
        &leaf_kp.public,
        Validity::for_duration(Duration::from_secs(3600)),
        &[3],
        &mut rng,
        Some(&KeyIdentifier::compute(&ca1_kp.public)),
        true,
        Some(KeyUsage::DIGITAL_SIGNATURE),
        None,
        None,
    )
    .unwrap();
    assert!(!validator.check(&cert_x));

    let mut tampered = cert1.to_der().to_vec();
    tampered[10] ^= 0x01;
    cert1 = Certificate::from_der(&tampered).unwrap();
    assert!(!validator.check(&cert1));
}
