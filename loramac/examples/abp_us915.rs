//! ABP device on the US915 hybrid plan with confirmed uplinks
//!
//! A simulated network acknowledges every confirmed uplink in RX1 and answers
//! LinkCheckReq. Everything runs on a virtual clock and prints to stdout.
//!
//! Run with `cargo run --example abp_us915 --features std`.

use std::time::Duration;

use loramac::{
    config::{
        device::{AESKey, DevAddr, DeviceConfig},
        mac::MacConfig,
    },
    crypto::{self, Direction},
    device::{Device, DeviceError},
    lorawan::{Event, EventConsumer, EventProducer, EventQueue, Indication, MacOption, Region, TimerId, Timers},
    radio::{Radio, RadioEvent, RadioParam, RxConfig, TxConfig},
};
use rand_core::{impls, RngCore};

const DEVEUI: [u8; 8] = [0x00, 0x04, 0xA3, 0x0B, 0x00, 0x1B, 0xB0, 0xDB];
const APPEUI: [u8; 8] = [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01];
const DEV_ADDR: DevAddr = DevAddr::new(0x2601_1BDB);
const NWK_SKEY: AESKey = AESKey::new([
    0x15, 0xB1, 0xD0, 0xEF, 0xA4, 0x63, 0xDF, 0xBE, 0x3D, 0x11, 0x18, 0x1E, 0x1E, 0xC7, 0xDA, 0x85,
]);
const APP_SKEY: AESKey = AESKey::new([
    0xD7, 0x2C, 0x78, 0x75, 0x8C, 0xDC, 0xCA, 0xBF, 0x55, 0xEE, 0x4A, 0x77, 0x8D, 0x16, 0xEF, 0x67,
]);

/// Radio wired to a network server that acks and answers link checks
struct SimRadio {
    irq: Option<RadioEvent>,
    fcnt_down: u32,
    downlink: Option<Vec<u8>>,
    delivered: Option<Vec<u8>>,
}

impl SimRadio {
    fn new() -> Self {
        Self {
            irq: None,
            fcnt_down: 0,
            downlink: None,
            delivered: None,
        }
    }

    fn answer(&mut self, uplink: &[u8]) {
        let confirmed = uplink[0] & 0xE0 == 0x80;
        let fopts = &uplink[8..8 + (uplink[5] & 0x0F) as usize];
        let link_check = fopts.contains(&0x02);
        if !confirmed && !link_check {
            return;
        }

        self.fcnt_down += 1;
        let mut frame = vec![0x60];
        frame.extend_from_slice(&DEV_ADDR.to_le_bytes());
        let mut fctrl = if confirmed { 0x20 } else { 0x00 };
        if link_check {
            fctrl |= 3;
        }
        frame.push(fctrl);
        frame.extend_from_slice(&(self.fcnt_down as u16).to_le_bytes());
        if link_check {
            // 12 dB margin seen by 2 gateways
            frame.extend_from_slice(&[0x02, 12, 2]);
        }
        let mic = crypto::compute_mic(&NWK_SKEY, &frame, DEV_ADDR, self.fcnt_down, Direction::Down);
        frame.extend_from_slice(&mic);
        self.downlink = Some(frame);
    }
}

impl Radio for SimRadio {
    type Error = ();

    fn init(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn isr(&mut self) -> Result<Option<RadioEvent>, Self::Error> {
        Ok(self.irq.take())
    }

    fn configure_tx(&mut self, config: TxConfig) -> Result<(), Self::Error> {
        println!("[radio] TX {} Hz {:?} {} dBm", config.frequency, config.modulation, config.power);
        Ok(())
    }

    fn transmit(&mut self, buffer: &[u8]) -> Result<(), Self::Error> {
        println!("[radio] -> {:02X?}", buffer);
        self.answer(buffer);
        self.irq = Some(RadioEvent::TxDone);
        Ok(())
    }

    fn configure_rx(&mut self, config: RxConfig) -> Result<(), Self::Error> {
        if config.window.is_some() {
            println!("[radio] RX {} Hz {:?}", config.frequency, config.modulation);
            self.delivered = self.downlink.take();
            self.irq = Some(if self.delivered.is_some() {
                RadioEvent::RxDone
            } else {
                RadioEvent::RxTimeout
            });
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let frame = self.delivered.take().ok_or(())?;
        let len = frame.len().min(buffer.len());
        buffer[..len].copy_from_slice(&frame[..len]);
        Ok(len)
    }

    fn get_rssi(&mut self) -> Result<i16, Self::Error> {
        Ok(-85)
    }

    fn get_snr(&mut self) -> Result<i8, Self::Error> {
        Ok(4)
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn standby(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set(&mut self, param: RadioParam, value: u32) -> Result<(), Self::Error> {
        println!("[radio] {:?} = {:#X}", param, value);
        Ok(())
    }

    fn get(&mut self, _param: RadioParam) -> Result<u32, Self::Error> {
        Err(())
    }
}

#[derive(Default)]
struct SimTimers {
    now: Duration,
    armed: Vec<(TimerId, Duration)>,
}

impl SimTimers {
    fn next_expiry(&mut self) -> Option<TimerId> {
        let (index, _) = self.armed.iter().enumerate().min_by_key(|(_, (_, at))| *at)?;
        let (id, at) = self.armed.remove(index);
        self.now = self.now.max(at);
        Some(id)
    }
}

impl Timers for SimTimers {
    fn now(&mut self) -> Duration {
        self.now
    }

    fn arm(&mut self, id: TimerId, delay: Duration) {
        self.cancel(id);
        self.armed.push((id, self.now + delay));
    }

    fn cancel(&mut self, id: TimerId) {
        self.armed.retain(|(t, _)| *t != id);
    }
}

struct XorShift(u32);

impl RngCore for XorShift {
    fn next_u32(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

type SimDevice = Device<SimRadio, SimTimers, XorShift>;

fn run<const N: usize>(
    device: &mut SimDevice,
    producer: &mut EventProducer<'_, N>,
    consumer: &mut EventConsumer<'_, N>,
) -> Result<(), DeviceError<()>> {
    loop {
        device.process(consumer)?;
        while let Some(indication) = device.poll_indication() {
            match indication {
                Indication::LinkCheck { margin, gateways } => {
                    println!("[app] link margin {} dB, {} gateways", margin, gateways)
                }
                other => println!("[app] {:?}", other),
            }
        }

        if device.mac().radio().irq.is_some() {
            let _ = producer.enqueue(Event::RadioIrq);
        } else if let Some(id) = device.mac_mut().timers_mut().next_expiry() {
            let _ = producer.enqueue(Event::Timer(id));
        } else {
            return Ok(());
        }
    }
}

fn main() -> Result<(), DeviceError<()>> {
    let config = DeviceConfig::new_abp(DEVEUI, APPEUI, DEV_ADDR, NWK_SKEY, APP_SKEY);
    let mut device = Device::new(
        SimRadio::new(),
        SimTimers::default(),
        XorShift(0x0BAD_F00D),
        config,
        MacConfig::new(Region::Us915Hybrid),
    );
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut producer, mut consumer) = queue.split();

    // ABP sessions are activated by init
    device.init()?;
    device.set(MacOption::DataRate(3))?;

    device.link_check()?;
    device.send_unconfirmed(2, b"boot")?;
    run(&mut device, &mut producer, &mut consumer)?;

    for reading in [21u8, 22, 21] {
        device.send_confirmed(2, &[reading])?;
        run(&mut device, &mut producer, &mut consumer)?;
    }

    let session = device.get_session_state();
    println!("[app] FCntUp {} FCntDown {}", session.fcnt_up, session.fcnt_down);
    Ok(())
}
