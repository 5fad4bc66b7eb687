use loramac::{
    config::{
        device::{ActivationState, DeviceClass, DeviceConfig},
        mac::MacConfig,
    },
    device::{power::PowerState, Device, DeviceError},
    lorawan::{
        mac::{Indication, MacError, MacOption, MacOptionId},
        region::Region,
        timer::TimerId,
        Event, EventProducer, EventQueue,
    },
    radio::{traits::time_on_air, RadioEvent},
};

use mock::*;

type TestDevice = Device<MockRadio, MockTimers, TestRng>;

fn device(config: DeviceConfig) -> TestDevice {
    let mut mac_config = MacConfig::new(Region::Eu868);
    mac_config.duty_cycle = Some(false);
    Device::new(MockRadio::new(), MockTimers::new(), TestRng::new(3), config, mac_config)
}

fn abp_device() -> TestDevice {
    let mut device = device(DeviceConfig::new_abp(DEV_EUI, APP_EUI, DEV_ADDR, NWK_SKEY, APP_SKEY));
    device.init().unwrap();
    device
}

/// Queue the expiry of a MAC timer, as a timer interrupt would
fn timer_fires<const N: usize>(device: &mut TestDevice, producer: &mut EventProducer<'_, N>, id: TimerId) {
    let event = device.mac_mut().timers_mut().expire(id).unwrap();
    producer.enqueue(event).unwrap();
}

#[test]
fn test_abp_device_activates_on_init() {
    let device = abp_device();
    let session = device.get_session_state();
    assert_eq!(session.activation_state, ActivationState::ABPActivated);
    assert_eq!(session.dev_addr, DEV_ADDR);
    assert_eq!(session.fcnt_up, 1);
    assert!(!device.is_busy());
}

#[test]
fn test_activation_must_match_provisioning() {
    let mut abp = abp_device();
    assert_eq!(abp.join_otaa(), Err(DeviceError::InvalidConfig));

    let mut otaa = device(otaa_config());
    otaa.init().unwrap();
    assert!(!otaa.get_session_state().is_joined());
    assert_eq!(otaa.activate_abp(), Err(DeviceError::InvalidConfig));
    assert_eq!(
        otaa.send_unconfirmed(1, b"early"),
        Err(DeviceError::Mac(MacError::NoNetworkJoined))
    );

    otaa.join_otaa().unwrap();
    assert!(otaa.is_busy());
    assert_eq!(otaa.get_session_state().activation_state, ActivationState::Joining);
}

#[test]
fn test_otaa_join_through_event_queue() {
    let mut device = device(otaa_config());
    device.init().unwrap();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut producer, mut consumer) = queue.split();

    device.join_otaa().unwrap();
    producer.enqueue(Event::Radio(RadioEvent::TxDone)).unwrap();
    device.process(&mut consumer).unwrap();

    timer_fires(&mut device, &mut producer, TimerId::Rx1);
    let accept = join_accept(&APP_KEY, [7, 7, 7], [0, 0, 0x13], DEV_ADDR, 0x00, 1, None);
    device.mac_mut().radio_mut().set_rx_data(&accept);
    producer.enqueue(Event::Radio(RadioEvent::RxDone)).unwrap();
    device.process(&mut consumer).unwrap();

    assert_eq!(device.poll_indication(), Some(Indication::Joined { dev_addr: DEV_ADDR }));
    assert_eq!(
        device.get_session_state().activation_state,
        ActivationState::OTAAActivated
    );
    assert!(!device.is_busy());
}

#[test]
fn test_uplink_and_downlink_through_event_queue() {
    let mut device = abp_device();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut producer, mut consumer) = queue.split();

    device.send_unconfirmed(10, b"temp=21").unwrap();
    assert!(device.is_busy());
    assert_eq!(device.mac().radio().tx_frames.len(), 1);

    producer.enqueue(Event::Radio(RadioEvent::TxDone)).unwrap();
    device.process(&mut consumer).unwrap();
    timer_fires(&mut device, &mut producer, TimerId::Rx1);
    device.process(&mut consumer).unwrap();

    let down = Downlink {
        port: Some(10),
        payload: b"interval=60",
        ..Downlink::new(1)
    }
    .build();
    device.mac_mut().radio_mut().set_rx_data(&down);
    producer.enqueue(Event::Radio(RadioEvent::RxDone)).unwrap();
    device.process(&mut consumer).unwrap();

    match device.poll_indication() {
        Some(Indication::Data { port, payload, multicast, .. }) => {
            assert_eq!(port, 10);
            assert_eq!(&payload[..], b"interval=60");
            assert!(!multicast);
        }
        other => panic!("unexpected indication {:?}", other),
    }
    assert_eq!(device.poll_indication(), None);
    assert!(!device.is_busy());
    assert_eq!(device.get_session_state().fcnt_up, 2);
    assert_eq!(device.get_session_state().fcnt_down, 1);
}

#[test]
fn test_confirmed_uplink_reports_delivery() {
    let mut device = abp_device();
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut producer, mut consumer) = queue.split();

    device.send_confirmed(2, b"alarm").unwrap();
    assert_eq!(device.mac().radio().last_tx().unwrap()[0], 0x80);

    // Events queued back to back are handled in order
    producer.enqueue(Event::Radio(RadioEvent::TxDone)).unwrap();
    device.process(&mut consumer).unwrap();
    timer_fires(&mut device, &mut producer, TimerId::Rx1);
    producer.enqueue(Event::Radio(RadioEvent::RxTimeout)).unwrap();
    timer_fires(&mut device, &mut producer, TimerId::Rx2);
    device.process(&mut consumer).unwrap();

    let ack = Downlink { ack: true, ..Downlink::new(1) }.build();
    device.mac_mut().radio_mut().set_rx_data(&ack);
    producer.enqueue(Event::Radio(RadioEvent::RxDone)).unwrap();
    device.process(&mut consumer).unwrap();

    assert_eq!(device.poll_indication(), Some(Indication::Delivered));
    assert!(!device.is_busy());
}

#[test]
fn test_radio_interrupt_is_decoded_by_driver() {
    let mut device = abp_device();
    let mut queue: EventQueue<4> = EventQueue::new();
    let (mut producer, mut consumer) = queue.split();

    device.send_unconfirmed(1, b"irq").unwrap();
    device.mac_mut().radio_mut().irq = Some(RadioEvent::TxDone);
    producer.enqueue(Event::RadioIrq).unwrap();
    device.process(&mut consumer).unwrap();

    assert!(device.mac().timers().is_armed(TimerId::Rx1));
    assert!(device.mac().timers().is_armed(TimerId::Rx2));
}

#[test]
fn test_power_metrics_track_airtime() {
    let mut device = abp_device();
    device.send_unconfirmed(1, b"measure").unwrap();
    let radio = device.mac().radio();
    let airtime = time_on_air(radio.tx_configs.last().unwrap(), radio.last_tx().unwrap().len());
    device.handle_event(Event::Radio(RadioEvent::TxDone)).unwrap();

    let metrics = device.power().get_metrics();
    assert_eq!(metrics.tx_count, 1);
    assert_eq!(metrics.tx_time, airtime);
}

#[test]
fn test_battery_level_thresholds() {
    let mut device = abp_device();
    assert_eq!(device.update_battery(200), PowerState::Normal);
    assert_eq!(device.update_battery(25), PowerState::PowerSaving);
    assert_eq!(device.update_battery(5), PowerState::Critical);
    assert_eq!(device.update_battery(0), PowerState::Normal);
    assert_eq!(device.power().battery_level(), 0);
}

#[test]
fn test_device_class_and_options() {
    let mut device = abp_device();
    assert_eq!(device.device_class(), DeviceClass::A);
    device.set_device_class(DeviceClass::C).unwrap();
    assert_eq!(device.device_class(), DeviceClass::C);
    assert_eq!(device.get(MacOptionId::Class).unwrap(), MacOption::Class(DeviceClass::C));

    device.set(MacOption::NbRep(3)).unwrap();
    assert_eq!(device.get(MacOptionId::NbRep).unwrap(), MacOption::NbRep(3));
    assert_eq!(device.remove_multicast(DEV_ADDR), Err(DeviceError::InvalidState));
}
