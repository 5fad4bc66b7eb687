use core::time::Duration;

use loramac::{
    config::device::{ActivationState, DeviceClass},
    crypto,
    lorawan::{
        mac::{ExchangeState, Indication, MacError, MacOption, MacOptionId},
        region::Region,
        timer::TimerId,
    },
    radio::traits::{Modulation, RadioParam},
};

use mock::*;

fn fctrl(frame: &[u8]) -> u8 {
    frame[5]
}

fn fcnt(frame: &[u8]) -> u16 {
    u16::from_le_bytes([frame[6], frame[7]])
}

fn fopts(frame: &[u8]) -> &[u8] {
    let len = (fctrl(frame) & 0x0F) as usize;
    &frame[8..8 + len]
}

fn spreading_factor(modulation: Modulation) -> u8 {
    match modulation {
        Modulation::LoRa { spreading_factor, .. } => spreading_factor,
        Modulation::Fsk { .. } => 0,
    }
}

fn eu_abp() -> TestMac {
    let mut mac = abp_mac(Region::Eu868, DeviceClass::A);
    mac.set(MacOption::DutyCycle(false)).unwrap();
    mac
}

/// Send an unconfirmed uplink and let both windows pass
fn quiet_uplink(mac: &mut TestMac, payload: &[u8]) {
    mac.send_data(1, payload, false).unwrap();
    tx_done(mac);
    miss_both_windows(mac);
    assert_eq!(mac.state(), ExchangeState::Idle);
}

/// Send an unconfirmed uplink and answer it in RX1
fn answered_uplink(mac: &mut TestMac, downlink: &[u8]) {
    mac.send_data(1, b"up", false).unwrap();
    tx_done(mac);
    assert!(fire(mac, TimerId::Rx1));
    receive(mac, downlink);
}

#[test]
fn test_otaa_join_installs_session() {
    let mut mac = new_mac(mac_config(Region::Eu868, DeviceClass::A));
    mac.join_otaa().unwrap();

    assert_eq!(mac.session().activation_state, ActivationState::Joining);
    assert_eq!(mac.state(), ExchangeState::Transmitting);
    let request = mac.radio().last_tx().unwrap().to_vec();
    assert_eq!(request.len(), 23);
    assert_eq!(request[0], 0x00);
    let uplink_freq = mac.radio().tx_configs[0].frequency;
    assert!([868_100_000, 868_300_000, 868_500_000].contains(&uplink_freq));

    tx_done(&mut mac);
    let now = mac.timers().now;
    assert_eq!(mac.timers().deadline(TimerId::Rx1), Some(now + Duration::from_millis(4997)));
    assert_eq!(mac.timers().deadline(TimerId::Rx2), Some(now + Duration::from_millis(5997)));
    assert!(!mac.timers().is_armed(TimerId::AckTimeout));

    assert!(fire(&mut mac, TimerId::Rx1));
    let rx = *mac.radio().last_rx().unwrap();
    assert_eq!(rx.frequency, uplink_freq);
    assert!(rx.window.is_some());
    assert!(rx.iq_inverted);

    let accept = join_accept(&APP_KEY, [0xA1, 0xA2, 0xA3], [0x00, 0x00, 0x13], DEV_ADDR, 0x23, 2, None);
    receive(&mut mac, &accept);

    assert_eq!(mac.poll_indication(), Some(Indication::Joined { dev_addr: DEV_ADDR }));
    assert_eq!(mac.state(), ExchangeState::Idle);
    assert!(!mac.timers().is_armed(TimerId::Rx2));

    let session = mac.session();
    assert_eq!(session.activation_state, ActivationState::OTAAActivated);
    assert_eq!(session.dev_addr, DEV_ADDR);
    assert_eq!(session.fcnt_up, 1);
    assert_eq!(session.fcnt_down, 0);

    let dev_nonce = u16::from_le_bytes([request[17], request[18]]);
    let (nwk_skey, app_skey) =
        crypto::derive_session_keys(&APP_KEY, &[0xA1, 0xA2, 0xA3], &[0x00, 0x00, 0x13], dev_nonce);
    assert_eq!(session.nwk_skey, nwk_skey);
    assert_eq!(session.app_skey, app_skey);

    let params = mac.params();
    assert_eq!(params.rx1_dr_offset, 2);
    assert_eq!(params.rx2_datarate, 3);
    assert_eq!(params.timing.rx1_delay, Duration::from_secs(2));
    assert_eq!(params.timing.rx2_delay, Duration::from_secs(3));
}

#[test]
fn test_join_accept_cflist_adds_channels() {
    let mut mac = new_mac(mac_config(Region::Eu868, DeviceClass::A));
    mac.join_otaa().unwrap();
    tx_done(&mut mac);
    assert!(fire(&mut mac, TimerId::Rx1));

    let cf_list = [867_100_000, 867_300_000, 867_500_000, 0, 867_900_000];
    let accept = join_accept(&APP_KEY, [1, 2, 3], [0, 0, 1], DEV_ADDR, 0x00, 1, Some(cf_list));
    receive(&mut mac, &accept);
    assert!(matches!(mac.poll_indication(), Some(Indication::Joined { .. })));

    let plan = mac.plan();
    assert_eq!(plan.channel(3).unwrap().frequency, 867_100_000);
    assert_eq!(plan.channel(5).unwrap().frequency, 867_500_000);
    assert!(plan.channel(6).is_none());
    assert_eq!(plan.channel(7).unwrap().frequency, 867_900_000);
    assert!(plan.mask().is_enabled(7));
}

#[test]
fn test_join_accept_with_bad_mic_triggers_retry() {
    let mut mac = new_mac(mac_config(Region::Us915, DeviceClass::A));
    mac.join_otaa().unwrap();
    let first = mac.radio().tx_configs[0];
    assert_eq!(spreading_factor(first.modulation), 8);
    tx_done(&mut mac);
    assert!(fire(&mut mac, TimerId::Rx1));

    let mut accept = join_accept(&APP_KEY, [1, 2, 3], [0, 0, 1], DEV_ADDR, 0x00, 1, None);
    let last = accept.len() - 1;
    accept[last] ^= 0x01;
    receive(&mut mac, &accept);

    assert_eq!(mac.poll_indication(), None);
    assert!(!mac.session().is_joined());
    assert_eq!(mac.state(), ExchangeState::Transmitting);
    assert_eq!(mac.join_trials(), 2);
    assert_eq!(mac.radio().tx_frames.len(), 2);
    // Second attempt alternates to a 125 kHz datarate
    assert_eq!(spreading_factor(mac.radio().tx_configs[1].modulation), 9);
}

#[test]
fn test_join_gives_up_after_max_trials() {
    let mut config = mac_config(Region::Us915, DeviceClass::A);
    config.max_join_trials = 2;
    let mut mac = new_mac(config);
    mac.join_otaa().unwrap();

    tx_done(&mut mac);
    miss_both_windows(&mut mac);
    assert_eq!(mac.radio().tx_frames.len(), 2);
    let frames = &mac.radio().tx_frames;
    assert_ne!(frames[0][17..19], frames[1][17..19]);

    tx_done(&mut mac);
    miss_both_windows(&mut mac);
    assert_eq!(mac.radio().tx_frames.len(), 2);
    assert_eq!(mac.poll_indication(), Some(Indication::JoinFailed));
    assert_eq!(mac.session().activation_state, ActivationState::Idle);
    assert_eq!(mac.state(), ExchangeState::Idle);
}

#[test]
fn test_send_requires_session_and_valid_port() {
    let mut mac = new_mac(mac_config(Region::Eu868, DeviceClass::A));
    assert_eq!(mac.send_data(1, b"x", false), Err(MacError::NoNetworkJoined));

    let mut mac = eu_abp();
    assert_eq!(mac.send_data(0, b"x", false), Err(MacError::InvalidPort));
    assert_eq!(mac.send_data(224, b"x", false), Err(MacError::InvalidPort));
    mac.send_data(223, b"x", false).unwrap();
    assert_eq!(mac.send_data(1, b"x", false), Err(MacError::Busy));
}

#[test]
fn test_payload_length_includes_mac_commands() {
    let mut mac = eu_abp();
    // DR0 carries at most 51 bytes
    assert_eq!(mac.send_data(1, &[0u8; 52], false), Err(MacError::LengthError));

    mac.link_check().unwrap();
    assert_eq!(mac.send_data(1, &[0u8; 51], false), Err(MacError::LengthError));
    mac.send_data(1, &[0u8; 50], false).unwrap();
    assert_eq!(fopts(mac.radio().last_tx().unwrap()), &[0x02]);
}

#[test]
fn test_unconfirmed_uplink_advances_counter_once() {
    let mut mac = eu_abp();
    mac.set(MacOption::DataRate(3)).unwrap();
    quiet_uplink(&mut mac, b"one");
    quiet_uplink(&mut mac, b"two");

    let frames = &mac.radio().tx_frames;
    assert_eq!(fcnt(&frames[0]), 1);
    assert_eq!(fcnt(&frames[1]), 2);
    assert_eq!(mac.session().fcnt_up, 3);
    assert_eq!(mac.adr_ack_counter(), 2);
}

#[test]
fn test_nb_rep_repeats_identical_frame() {
    let mut mac = eu_abp();
    mac.set(MacOption::NbRep(2)).unwrap();
    mac.send_data(1, b"rep", false).unwrap();

    tx_done(&mut mac);
    miss_both_windows(&mut mac);
    assert_eq!(mac.state(), ExchangeState::Transmitting);

    tx_done(&mut mac);
    miss_both_windows(&mut mac);
    assert_eq!(mac.state(), ExchangeState::Idle);

    let frames = &mac.radio().tx_frames;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], frames[1]);
    assert_eq!(mac.session().fcnt_up, 2);
    assert_eq!(mac.adr_ack_counter(), 1);
}

#[test]
fn test_confirmed_uplink_acknowledged_in_rx1() {
    let mut mac = eu_abp();
    mac.send_data(2, b"ping", true).unwrap();
    tx_done(&mut mac);
    assert!(mac.timers().is_armed(TimerId::AckTimeout));

    assert!(fire(&mut mac, TimerId::Rx1));
    let ack = Downlink { ack: true, ..Downlink::new(1) }.build();
    receive(&mut mac, &ack);

    assert_eq!(mac.poll_indication(), Some(Indication::Delivered));
    assert_eq!(mac.state(), ExchangeState::Idle);
    assert_eq!(mac.session().fcnt_up, 2);
    assert_eq!(mac.session().fcnt_down, 1);
    assert!(!mac.timers().is_armed(TimerId::AckTimeout));
    assert!(!mac.timers().is_armed(TimerId::Rx2));
}

#[test]
fn test_confirmed_uplink_retries_and_steps_datarate_down() {
    let mut mac = eu_abp();
    mac.set(MacOption::DataRate(5)).unwrap();
    mac.send_data(1, b"ping", true).unwrap();

    for attempt in 0..6 {
        tx_done(&mut mac);
        let now = mac.timers().now;
        let ack_deadline = mac.timers().deadline(TimerId::AckTimeout).unwrap();
        assert!(ack_deadline >= now + Duration::from_millis(3000));
        assert!(ack_deadline <= now + Duration::from_millis(5000));

        miss_both_windows(&mut mac);
        assert_eq!(mac.state(), ExchangeState::AckWait);
        assert!(fire(&mut mac, TimerId::AckTimeout));
        if attempt < 5 {
            assert_eq!(mac.state(), ExchangeState::Transmitting);
        }
    }

    assert_eq!(mac.state(), ExchangeState::Idle);
    assert_eq!(mac.poll_indication(), Some(Indication::DeliveryFailed));
    assert_eq!(mac.session().fcnt_up, 2);
    assert_eq!(mac.adr_ack_counter(), 1);

    let radio = mac.radio();
    assert_eq!(radio.tx_frames.len(), 6);
    assert!(radio.tx_frames.iter().all(|f| *f == radio.tx_frames[0]));
    let sfs: Vec<u8> = radio.tx_configs.iter().map(|c| spreading_factor(c.modulation)).collect();
    assert_eq!(sfs, [7, 7, 8, 8, 9, 9]);
}

#[test]
fn test_downlink_data_is_delivered() {
    let mut mac = eu_abp();
    mac.radio_mut().rssi = -97;
    mac.radio_mut().snr = -3;
    let down = Downlink {
        port: Some(10),
        payload: b"hello",
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);

    match mac.poll_indication() {
        Some(Indication::Data {
            port,
            payload,
            multicast,
            rssi,
            snr,
        }) => {
            assert_eq!(port, 10);
            assert_eq!(&payload[..], b"hello");
            assert!(!multicast);
            assert_eq!(rssi, -97);
            assert_eq!(snr, -3);
        }
        other => panic!("unexpected indication {:?}", other),
    }
    assert_eq!(mac.state(), ExchangeState::Idle);
    assert_eq!(mac.adr_ack_counter(), 0);
}

#[test]
fn test_duplicate_downlink_is_dropped() {
    let mut mac = eu_abp();
    let down = Downlink {
        port: Some(3),
        payload: b"once",
        ..Downlink::new(5)
    }
    .build();
    answered_uplink(&mut mac, &down);
    assert!(matches!(mac.poll_indication(), Some(Indication::Data { .. })));
    assert_eq!(mac.session().fcnt_down, 5);

    answered_uplink(&mut mac, &down);
    assert_eq!(mac.poll_indication(), None);
    assert_eq!(mac.state(), ExchangeState::Rx1Wait);
    assert!(fire(&mut mac, TimerId::Rx2));
    event(&mut mac, loramac::lorawan::Event::Radio(loramac::radio::RadioEvent::RxTimeout));
    assert_eq!(mac.state(), ExchangeState::Idle);
    assert_eq!(mac.session().fcnt_down, 5);
}

#[test]
fn test_replayed_first_downlink_is_dropped() {
    let mut mac = eu_abp();
    assert!(!mac.session().fcnt_down_valid);
    let down = Downlink {
        port: Some(3),
        payload: b"first",
        ..Downlink::new(0)
    }
    .build();
    answered_uplink(&mut mac, &down);
    assert!(matches!(mac.poll_indication(), Some(Indication::Data { .. })));
    assert!(mac.session().fcnt_down_valid);

    answered_uplink(&mut mac, &down);
    assert_eq!(mac.poll_indication(), None);
    assert_eq!(mac.state(), ExchangeState::Rx1Wait);
    assert_eq!(mac.session().fcnt_down, 0);
}

#[test]
fn test_confirmed_duplicate_is_acknowledged_only() {
    let mut mac = eu_abp();
    let down = Downlink {
        confirmed: true,
        port: Some(3),
        payload: b"cfm",
        ..Downlink::new(7)
    }
    .build();
    answered_uplink(&mut mac, &down);
    assert!(matches!(mac.poll_indication(), Some(Indication::Data { .. })));

    answered_uplink(&mut mac, &down);
    assert_eq!(mac.poll_indication(), None);
    assert_eq!(mac.state(), ExchangeState::Idle);

    mac.send_data(1, b"next", false).unwrap();
    assert_eq!(fctrl(mac.radio().last_tx().unwrap()) & 0x20, 0x20);
}

#[test]
fn test_downlink_counter_rolls_over_16_bits() {
    let mut mac = eu_abp();
    mac.set(MacOption::DownlinkCounter(0xFFFF)).unwrap();
    let down = Downlink {
        port: Some(1),
        payload: b"wrap",
        ..Downlink::new(0x1_0002)
    }
    .build();
    answered_uplink(&mut mac, &down);

    assert!(matches!(mac.poll_indication(), Some(Indication::Data { .. })));
    assert_eq!(mac.session().fcnt_down, 0x1_0002);
}

#[test]
fn test_downlink_counter_gap_is_rejected() {
    let mut mac = eu_abp();
    mac.set(MacOption::DownlinkCounter(10)).unwrap();
    let down = Downlink {
        port: Some(1),
        payload: b"far",
        ..Downlink::new(10 + 16384)
    }
    .build();
    answered_uplink(&mut mac, &down);

    assert_eq!(mac.poll_indication(), None);
    assert_eq!(mac.session().fcnt_down, 10);
}

#[test]
fn test_flipped_mic_bit_is_rejected() {
    let mut mac = eu_abp();
    let mut down = Downlink {
        port: Some(1),
        payload: b"data",
        ..Downlink::new(1)
    }
    .build();
    let last = down.len() - 1;
    down[last] ^= 0x80;
    answered_uplink(&mut mac, &down);

    assert_eq!(mac.poll_indication(), None);
    assert_eq!(mac.session().fcnt_down, 0);
    assert_eq!(mac.state(), ExchangeState::Rx1Wait);
}

#[test]
fn test_downlink_with_any_flipped_bit_is_dropped() {
    let down = Downlink {
        port: Some(1),
        payload: b"data",
        ..Downlink::new(1)
    }
    .build();
    for bit in 0..down.len() * 8 {
        let mut mac = eu_abp();
        let mut frame = down.clone();
        frame[bit / 8] ^= 1 << (bit % 8);
        answered_uplink(&mut mac, &frame);

        assert_eq!(mac.poll_indication(), None, "bit {} flipped", bit);
        assert!(!mac.session().fcnt_down_valid);
    }
}

#[test]
fn test_failed_transmission_keeps_mac_answers() {
    let mut mac = eu_abp();
    let down = Downlink {
        confirmed: true,
        fopts: &[0x03, 0x53, 0x07, 0x00, 0x02],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);

    mac.radio_mut().fail_transmit = true;
    assert_eq!(
        mac.send_data(1, b"x", false),
        Err(MacError::Radio(MockError::Error))
    );
    assert_eq!(mac.state(), ExchangeState::Idle);

    mac.radio_mut().fail_transmit = false;
    mac.send_data(1, b"x", false).unwrap();
    let frame = mac.radio().last_tx().unwrap();
    assert_eq!(fctrl(frame) & 0x20, 0x20);
    assert_eq!(fopts(frame), &[0x03, 0x07]);
}

#[test]
fn test_foreign_address_is_ignored() {
    let mut mac = eu_abp();
    let down = Downlink {
        dev_addr: loramac::config::device::DevAddr::new(0x0BAD_0BAD),
        port: Some(1),
        payload: b"x",
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);
    assert_eq!(mac.poll_indication(), None);
    assert_eq!(mac.state(), ExchangeState::Rx1Wait);
}

#[test]
fn test_link_check_answer_is_indicated() {
    let mut mac = eu_abp();
    mac.link_check().unwrap();
    let down = Downlink {
        fopts: &[0x02, 20, 3],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);

    assert_eq!(fopts(&mac.radio().tx_frames[0]), &[0x02]);
    assert_eq!(
        mac.poll_indication(),
        Some(Indication::LinkCheck {
            margin: 20,
            gateways: 3
        })
    );
}

#[test]
fn test_link_adr_req_with_bad_datarate_is_rejected() {
    let mut mac = eu_abp();
    let down = Downlink {
        fopts: &[0x03, 0xF0, 0x07, 0x00, 0x01],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);
    assert_eq!(mac.params().datarate, 0);

    mac.send_data(1, b"x", false).unwrap();
    assert_eq!(fopts(mac.radio().last_tx().unwrap()), &[0x03, 0x05]);
}

#[test]
fn test_link_adr_req_applies_settings() {
    let mut mac = eu_abp();
    let down = Downlink {
        fopts: &[0x03, 0x53, 0x07, 0x00, 0x02],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);

    let params = mac.params();
    assert_eq!(params.datarate, 5);
    assert_eq!(params.tx_power, 3);
    assert_eq!(params.nb_rep, 2);

    mac.send_data(1, b"x", false).unwrap();
    assert_eq!(fopts(mac.radio().last_tx().unwrap()), &[0x03, 0x07]);
    assert_eq!(spreading_factor(mac.radio().tx_configs.last().unwrap().modulation), 7);
}

#[test]
fn test_rx_timing_setup_answer_repeats_until_downlink() {
    let mut mac = eu_abp();
    let down = Downlink {
        fopts: &[0x08, 0x03],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);
    assert_eq!(mac.params().timing.rx1_delay, Duration::from_secs(3));

    mac.send_data(1, b"a", false).unwrap();
    assert_eq!(fopts(mac.radio().last_tx().unwrap()), &[0x08]);
    tx_done(&mut mac);
    let now = mac.timers().now;
    assert_eq!(mac.timers().deadline(TimerId::Rx1), Some(now + Duration::from_millis(2997)));
    assert_eq!(mac.timers().deadline(TimerId::Rx2), Some(now + Duration::from_millis(3997)));
    miss_both_windows(&mut mac);

    let empty = Downlink::new(2).build();
    answered_uplink(&mut mac, &empty);
    assert_eq!(fopts(mac.radio().last_tx().unwrap()), &[0x08]);

    mac.send_data(1, b"c", false).unwrap();
    assert!(fopts(mac.radio().last_tx().unwrap()).is_empty());
}

#[test]
fn test_dev_status_req_reports_battery_and_margin() {
    let mut mac = eu_abp();
    mac.power_mut().update_battery(200);
    mac.radio_mut().snr = -40;
    let down = Downlink {
        fopts: &[0x06],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);

    mac.send_data(1, b"x", false).unwrap();
    assert_eq!(fopts(mac.radio().last_tx().unwrap()), &[0x06, 200, 0x20]);
}

#[test]
fn test_port_zero_commands_are_encrypted_with_network_key() {
    let mut mac = eu_abp();
    let down = Downlink {
        port: Some(0),
        payload: &[0x06],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);
    assert_eq!(mac.poll_indication(), None);

    // Pending answers with no application payload go out on port 0
    mac.send_data(1, &[], false).unwrap();
    let frame = mac.radio().last_tx().unwrap().to_vec();
    assert_eq!(fctrl(&frame) & 0x0F, 0);
    assert_eq!(frame[8], 0);
    let mut body = frame[9..frame.len() - 4].to_vec();
    crypto::encrypt_payload(&NWK_SKEY, DEV_ADDR, 2, crypto::Direction::Up, &mut body);
    assert_eq!(body[0], 0x06);
}

#[test]
fn test_duty_cycle_req_can_switch_device_off() {
    let mut mac = eu_abp();
    let down = Downlink {
        fopts: &[0x04, 0xFF],
        ..Downlink::new(1)
    }
    .build();
    answered_uplink(&mut mac, &down);

    assert!(mac.duty_cycle().is_device_off());
    assert_eq!(mac.send_data(1, b"x", false), Err(MacError::DeviceOff));
}

#[test]
fn test_options_round_trip_through_get() {
    let mut mac = eu_abp();
    assert_eq!(mac.get(MacOptionId::Rx2).unwrap(), MacOption::Rx2 {
        frequency: 869_525_000,
        datarate: 0
    });
    assert_eq!(mac.set(MacOption::NbRep(0)), Err(MacError::ParameterInvalid));
    assert_eq!(mac.set(MacOption::DataRate(9)), Err(MacError::ParameterInvalid));
    assert_eq!(
        mac.set(MacOption::Rx2 {
            frequency: 915_000_000,
            datarate: 0
        }),
        Err(MacError::ParameterInvalid)
    );

    mac.set(MacOption::Radio(RadioParam::Other(7), 42)).unwrap();
    assert_eq!(
        mac.get(MacOptionId::Radio(RadioParam::Other(7))).unwrap(),
        MacOption::Radio(RadioParam::Other(7), 42)
    );

    assert_eq!(
        mac.get(MacOptionId::Radio(RadioParam::SyncWord)).unwrap(),
        MacOption::Radio(RadioParam::SyncWord, 0x34)
    );
    mac.set(MacOption::PublicNetwork(false)).unwrap();
    assert_eq!(
        mac.get(MacOptionId::Radio(RadioParam::SyncWord)).unwrap(),
        MacOption::Radio(RadioParam::SyncWord, 0x12)
    );
}

#[test]
fn test_tx_timeout_ends_unconfirmed_exchange() {
    let mut mac = eu_abp();
    mac.send_data(1, b"x", false).unwrap();
    event(
        &mut mac,
        loramac::lorawan::Event::Radio(loramac::radio::RadioEvent::TxTimeout),
    );
    assert_eq!(mac.state(), ExchangeState::Idle);
    assert_eq!(mac.session().fcnt_up, 2);
}

#[test]
fn test_radio_irq_is_serviced_through_driver() {
    let mut mac = eu_abp();
    mac.send_data(1, b"x", false).unwrap();
    mac.radio_mut().irq = Some(loramac::radio::RadioEvent::TxDone);
    event(&mut mac, loramac::lorawan::Event::RadioIrq);
    assert_eq!(mac.state(), ExchangeState::Rx1Wait);
    assert!(mac.timers().is_armed(TimerId::Rx1));
}
