use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use loramac::{
    config::device::{AESKey, DevAddr, DeviceConfig, SessionState},
    crypto::{self, Direction},
    lorawan::frame::{
        self, DataDownlink, DataUplink, DropReason, FCtrl, MType, JOIN_REQUEST_LEN,
    },
};

use mock::*;

fn cmac(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

#[test]
fn test_device_config() {
    let app_key = AESKey::new([0x03; 16]);
    let config = DeviceConfig::new_otaa([0x01; 8], [0x02; 8], app_key);

    assert_eq!(&config.dev_eui, &[0x01; 8]);
    assert_eq!(&config.app_eui, &[0x02; 8]);
    assert_eq!(config.app_key.as_bytes(), &[0x03; 16]);
    assert!(config.dev_addr.is_none());
    assert!(!config.is_abp());

    let abp = DeviceConfig::new_abp([0x01; 8], [0x02; 8], DEV_ADDR, NWK_SKEY, APP_SKEY);
    assert!(abp.is_abp());
}

#[test]
fn test_session_state() {
    let session = SessionState::new_abp(DEV_ADDR, NWK_SKEY, APP_SKEY);

    assert!(session.is_joined());
    assert_eq!(session.dev_addr, DEV_ADDR);
    assert_eq!(session.nwk_skey.as_bytes(), &[0x11; 16]);
    assert_eq!(session.fcnt_down, 0);
    assert!(!session.fcnt_down_valid);
    assert!(!SessionState::new().is_joined());
}

#[test]
fn test_keys_are_not_printed() {
    let printed = format!("{:?}", APP_KEY);
    assert!(!printed.contains("2B"));
    assert!(!printed.contains("43"));
}

#[test]
fn test_cmac_matches_rfc4493_vector() {
    let key = AESKey::new([
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f, 0x3c,
    ]);
    let message = [
        0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17, 0x2a,
    ];
    assert_eq!(crypto::compute_join_mic(&key, &message), [0x07, 0x0a, 0x16, 0xb4]);
}

#[test]
fn test_data_mic_signs_b0_block() {
    let data = [0x40, 0xDA, 0x1B, 0x01, 0x26, 0x00, 0x05, 0x00, 0x01, 0xAA, 0xBB];
    let mic = crypto::compute_mic(&NWK_SKEY, &data, DEV_ADDR, 0x0001_0005, Direction::Up);

    let mut b0 = vec![0x49, 0, 0, 0, 0, 0x00];
    b0.extend_from_slice(&DEV_ADDR.to_le_bytes());
    b0.extend_from_slice(&0x0001_0005u32.to_le_bytes());
    b0.extend_from_slice(&[0x00, data.len() as u8]);
    b0.extend_from_slice(&data);
    assert_eq!(mic[..], cmac(NWK_SKEY.as_bytes(), &b0)[..4]);

    let down = crypto::compute_mic(&NWK_SKEY, &data, DEV_ADDR, 0x0001_0005, Direction::Down);
    assert_ne!(mic, down);
}

#[test]
fn test_payload_encryption_reverses_itself() {
    let plain = b"Hello LoRaWAN, longer than one block";
    let mut data = plain.to_vec();
    crypto::encrypt_payload(&APP_SKEY, DEV_ADDR, 9, Direction::Up, &mut data);
    assert_ne!(&data[..], &plain[..]);

    let mut other = plain.to_vec();
    crypto::encrypt_payload(&APP_SKEY, DEV_ADDR, 10, Direction::Up, &mut other);
    assert_ne!(data, other);

    crypto::encrypt_payload(&APP_SKEY, DEV_ADDR, 9, Direction::Up, &mut data);
    assert_eq!(&data[..], &plain[..]);
}

#[test]
fn test_payload_encryption_round_trips_every_length() {
    for key in [NWK_SKEY, APP_SKEY] {
        for dir in [Direction::Up, Direction::Down] {
            for len in 0..=242usize {
                let plain: Vec<u8> = (0..len).map(|i| (i * 7 + 1) as u8).collect();
                let mut data = plain.clone();
                crypto::encrypt_payload(&key, DEV_ADDR, 0x0001_0042, dir, &mut data);
                if len >= 4 {
                    assert_ne!(data, plain, "length {} left in clear", len);
                }
                crypto::encrypt_payload(&key, DEV_ADDR, 0x0001_0042, dir, &mut data);
                assert_eq!(data, plain, "length {} {:?}", len, dir);
            }
        }
    }
}

#[test]
fn test_session_key_derivation() {
    let app_nonce = [0x01, 0x02, 0x03];
    let net_id = [0x13, 0x00, 0x00];
    let (nwk, app) = crypto::derive_session_keys(&APP_KEY, &app_nonce, &net_id, 0xBEEF);

    let cipher = Aes128::new(GenericArray::from_slice(APP_KEY.as_bytes()));
    for (prefix, key) in [(0x01, nwk), (0x02, app)] {
        let mut block = [0u8; 16];
        block[0] = prefix;
        block[1..4].copy_from_slice(&app_nonce);
        block[4..7].copy_from_slice(&net_id);
        block[7..9].copy_from_slice(&[0xEF, 0xBE]);
        cipher.encrypt_block(GenericArray::from_mut_slice(&mut block));
        assert_eq!(key.as_bytes(), &block);
    }
}

#[test]
fn test_join_request_layout() {
    let frame = frame::build_join_request(&APP_EUI, &DEV_EUI, 0x1234, &APP_KEY).unwrap();
    assert_eq!(frame.len(), JOIN_REQUEST_LEN);
    assert_eq!(frame[0], 0x00);

    let mut app_eui = APP_EUI;
    app_eui.reverse();
    let mut dev_eui = DEV_EUI;
    dev_eui.reverse();
    assert_eq!(&frame[1..9], &app_eui);
    assert_eq!(&frame[9..17], &dev_eui);
    assert_eq!(&frame[17..19], &[0x34, 0x12]);
    assert_eq!(frame[19..], cmac(APP_KEY.as_bytes(), &frame[..19])[..4]);
}

#[test]
fn test_join_accept_parsing() {
    let accept = join_accept(&APP_KEY, [0xAA, 0xBB, 0xCC], [0x01, 0x02, 0x03], DEV_ADDR, 0x35, 3, None);
    assert_eq!(accept.len(), 17);
    let parsed = frame::parse_join_accept(&accept, &APP_KEY).unwrap();

    assert_eq!(parsed.app_nonce, [0xAA, 0xBB, 0xCC]);
    assert_eq!(parsed.net_id, [0x01, 0x02, 0x03]);
    assert_eq!(parsed.dev_addr, DEV_ADDR);
    assert_eq!(parsed.rx1_dr_offset, 3);
    assert_eq!(parsed.rx2_datarate, 5);
    assert_eq!(parsed.rx_delay, 3);
    assert_eq!(parsed.cf_list, None);

    let freqs = [867_100_000, 867_300_000, 867_500_000, 867_700_000, 867_900_000];
    let accept = join_accept(&APP_KEY, [1, 2, 3], [4, 5, 6], DEV_ADDR, 0, 1, Some(freqs));
    assert_eq!(accept.len(), 33);
    assert_eq!(frame::parse_join_accept(&accept, &APP_KEY).unwrap().cf_list, Some(freqs));
}

#[test]
fn test_join_accept_rejections() {
    let accept = join_accept(&APP_KEY, [1, 2, 3], [4, 5, 6], DEV_ADDR, 0, 1, None);
    assert_eq!(
        frame::parse_join_accept(&accept, &AESKey::new([0x55; 16])),
        Err(DropReason::Mic)
    );
    assert_eq!(frame::parse_join_accept(&accept[..16], &APP_KEY), Err(DropReason::Malformed));

    let mut wrong_type = accept.clone();
    wrong_type[0] = 0x60;
    assert_eq!(frame::parse_join_accept(&wrong_type, &APP_KEY), Err(DropReason::UnexpectedType));
}

#[test]
fn test_fctrl_bits() {
    let fctrl = FCtrl {
        adr: true,
        ack: true,
        f_opts_len: 3,
        ..FCtrl::default()
    };
    assert_eq!(fctrl.to_byte(), 0xA3);
    assert_eq!(FCtrl::from_byte(0xA3), fctrl);
    assert!(FCtrl::from_byte(0x40).adr_ack_req);
    assert!(FCtrl::from_byte(0x10).f_pending);
}

#[test]
fn test_mtype_from_mhdr() {
    assert_eq!(MType::from_mhdr(0x40), MType::UnconfirmedDataUp);
    assert_eq!(MType::from_mhdr(0xA0), MType::ConfirmedDataDown);
    assert_eq!(MType::from_mhdr(0x21), MType::JoinAccept);
    assert_eq!(MType::from_mhdr(0xE0), MType::Proprietary);
}

#[test]
fn test_data_uplink_encoding() {
    let uplink = DataUplink {
        confirmed: true,
        dev_addr: DEV_ADDR,
        fctrl: FCtrl {
            adr: true,
            ..FCtrl::default()
        },
        fcnt: 0x0002_0010,
        fopts: &[0x02],
        port: Some(42),
        payload: b"temp=21",
    };
    let frame = frame::build_data_uplink(&uplink, &NWK_SKEY, &APP_SKEY).unwrap();

    assert_eq!(frame[0], 0x80);
    assert_eq!(&frame[1..5], &DEV_ADDR.to_le_bytes());
    assert_eq!(frame[5], 0x81);
    assert_eq!(&frame[6..8], &[0x10, 0x00]);
    assert_eq!(frame[8], 0x02);
    assert_eq!(frame[9], 42);

    let end = frame.len() - 4;
    let mut payload = frame[10..end].to_vec();
    crypto::encrypt_payload(&APP_SKEY, DEV_ADDR, 0x0002_0010, Direction::Up, &mut payload);
    assert_eq!(&payload[..], b"temp=21");

    let mic = crypto::compute_mic(&NWK_SKEY, &frame[..end], DEV_ADDR, 0x0002_0010, Direction::Up);
    assert_eq!(frame[end..], mic);
}

#[test]
fn test_oversized_fopts_are_refused() {
    let uplink = DataUplink {
        confirmed: false,
        dev_addr: DEV_ADDR,
        fctrl: FCtrl::default(),
        fcnt: 1,
        fopts: &[0u8; 16],
        port: None,
        payload: &[],
    };
    assert!(frame::build_data_uplink(&uplink, &NWK_SKEY, &APP_SKEY).is_err());
}

#[test]
fn test_downlink_parse_and_verify() {
    let bytes = Downlink {
        confirmed: true,
        ack: true,
        fopts: &[0x06],
        port: Some(9),
        payload: b"cfg",
        ..Downlink::new(0x0001_0003)
    }
    .build();
    let down = DataDownlink::parse(&bytes).unwrap();

    assert!(down.confirmed);
    assert!(down.fctrl.ack);
    assert_eq!(down.dev_addr, DEV_ADDR);
    assert_eq!(down.fcnt, 0x0003);
    assert_eq!(down.fopts, &[0x06]);
    assert_eq!(down.port, Some(9));
    assert!(down.verify(&NWK_SKEY, 0x0001_0003));
    assert!(!down.verify(&NWK_SKEY, 0x0003));

    let payload = down.decrypt_payload::<64>(&NWK_SKEY, &APP_SKEY, 0x0001_0003).unwrap();
    assert_eq!(&payload[..], b"cfg");

    let mut tampered = bytes.clone();
    tampered[10] ^= 0x01;
    assert!(!DataDownlink::parse(&tampered).unwrap().verify(&NWK_SKEY, 0x0001_0003));
}

#[test]
fn test_every_flipped_bit_fails_verification() {
    let fcnt = 0x0002_0011;
    let bytes = Downlink {
        fopts: &[0x06],
        port: Some(4),
        payload: b"reading",
        ..Downlink::new(fcnt)
    }
    .build();
    assert!(DataDownlink::parse(&bytes).unwrap().verify(&NWK_SKEY, fcnt));

    for bit in 0..bytes.len() * 8 {
        let mut frame = bytes.clone();
        frame[bit / 8] ^= 1 << (bit % 8);
        let accepted = DataDownlink::parse(&frame).map_or(false, |down| down.verify(&NWK_SKEY, fcnt));
        assert!(!accepted, "bit {} flipped", bit);
    }
}

#[test]
fn test_downlink_parse_rejections() {
    assert_eq!(DataDownlink::parse(&[0x60; 11]).err(), Some(DropReason::Malformed));
    let uplink = Downlink::new(1).build();
    let mut up = uplink.clone();
    up[0] = 0x40;
    assert_eq!(DataDownlink::parse(&up).err(), Some(DropReason::UnexpectedType));

    // FOptsLen pointing past the MIC
    let mut short = uplink;
    short[5] = 0x0F;
    assert_eq!(DataDownlink::parse(&short).err(), Some(DropReason::Malformed));
}

#[test]
fn test_downlink_counter_reconstruction() {
    assert_eq!(frame::downlink_counter(0, 0), Ok((0, 0)));
    assert_eq!(frame::downlink_counter(10, 11), Ok((11, 1)));
    assert_eq!(frame::downlink_counter(0xFFFF, 0x0002), Ok((0x1_0002, 3)));
    assert_eq!(frame::downlink_counter(0x2_FFF0, 0x0005), Ok((0x3_0005, 0x15)));
    assert_eq!(
        frame::downlink_counter(10, (10 + 16384) as u16),
        Err(DropReason::CounterGap)
    );
    // An older counter looks like a huge jump forward
    assert_eq!(frame::downlink_counter(100, 99), Err(DropReason::CounterGap));
}

#[test]
fn test_dev_addr_bytes() {
    let addr = DevAddr::new(0x2601_1BDA);
    assert_eq!(addr.to_le_bytes(), [0xDA, 0x1B, 0x01, 0x26]);
    assert_eq!(DevAddr::from_le_bytes([0xDA, 0x1B, 0x01, 0x26]), addr);
}
