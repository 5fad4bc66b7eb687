//! OTAA join and uplink on EU868 against a simulated network
//!
//! The radio and timers are simulated on a virtual clock. A tiny network
//! server answers the join request in RX1; afterwards the device sends
//! "Hello, LoRaWAN! #<n>" a few times and prints every indication.
//!
//! Run with `cargo run --example otaa_eu868 --features std`.

use std::time::Duration;

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::Aes128;
use loramac::{
    config::{
        device::{AESKey, DevAddr, DeviceConfig},
        mac::MacConfig,
    },
    crypto,
    device::{Device, DeviceError},
    lorawan::{Event, EventConsumer, EventProducer, EventQueue, Region, TimerId, Timers},
    radio::{Radio, RadioEvent, RadioParam, RxConfig, TxConfig},
};
use rand_core::{impls, RngCore};

const DEVEUI: [u8; 8] = [0x00, 0x04, 0xA3, 0x0B, 0x00, 0x1B, 0xB0, 0xDA];
const APPEUI: [u8; 8] = [0x70, 0xB3, 0xD5, 0x7E, 0xD0, 0x00, 0x00, 0x01];
const APPKEY: [u8; 16] = [
    0x2B, 0x7E, 0x15, 0x16, 0x28, 0xAE, 0xD2, 0xA6, 0xAB, 0xF7, 0x15, 0x88, 0x09, 0xCF, 0x4F, 0x3C,
];
const ASSIGNED_ADDR: u32 = 0x2601_1F00;

/// Radio that loops frames through a join server
struct SimRadio {
    app_key: AESKey,
    irq: Option<RadioEvent>,
    downlink: Option<Vec<u8>>,
    delivered: Option<Vec<u8>>,
}

impl SimRadio {
    fn new(app_key: AESKey) -> Self {
        Self {
            app_key,
            irq: None,
            downlink: None,
            delivered: None,
        }
    }

    /// Build the join accept a network server would send back
    fn answer_join(&mut self) {
        let mut frame = vec![0x20, 0x01, 0x00, 0x00, 0x13, 0x00, 0x00];
        frame.extend_from_slice(&ASSIGNED_ADDR.to_le_bytes());
        frame.extend_from_slice(&[0x00, 0x01]);
        let mic = crypto::compute_join_mic(&self.app_key, &frame);
        frame.extend_from_slice(&mic);

        let cipher = Aes128::new(GenericArray::from_slice(self.app_key.as_bytes()));
        for block in frame[1..].chunks_exact_mut(16) {
            cipher.decrypt_block(GenericArray::from_mut_slice(block));
        }
        self.downlink = Some(frame);
    }
}

impl Radio for SimRadio {
    type Error = ();

    fn init(&mut self) -> Result<(), Self::Error> {
        println!("[radio] init");
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
        if buffer.first() == Some(&0x00) {
            self.answer_join();
        }
        self.irq = Some(RadioEvent::TxDone);
        Ok(())
    }

    fn configure_rx(&mut self, config: RxConfig) -> Result<(), Self::Error> {
        if config.window.is_some() {
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
        println!("[radio] <- {:02X?}", &buffer[..len]);
        Ok(len)
    }

    fn get_rssi(&mut self) -> Result<i16, Self::Error> {
        Ok(-60)
    }

    fn get_snr(&mut self) -> Result<i8, Self::Error> {
        Ok(8)
    }

    fn sleep(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn standby(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set(&mut self, _param: RadioParam, _value: u32) -> Result<(), Self::Error> {
        Ok(())
    }

    fn get(&mut self, _param: RadioParam) -> Result<u32, Self::Error> {
        Err(())
    }
}

/// Timers on a virtual clock
#[derive(Default)]
struct SimTimers {
    now: Duration,
    armed: Vec<(TimerId, Duration)>,
}

impl SimTimers {
    /// Jump to the earliest armed timer and disarm it
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

/// Run the device until no timer is left
fn run<const N: usize>(
    device: &mut SimDevice,
    producer: &mut EventProducer<'_, N>,
    consumer: &mut EventConsumer<'_, N>,
) -> Result<(), DeviceError<()>> {
    loop {
        device.process(consumer)?;
        while let Some(indication) = device.poll_indication() {
            println!("[app] {:?}", indication);
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
    let app_key = AESKey::new(APPKEY);
    let config = DeviceConfig::new_otaa(DEVEUI, APPEUI, app_key);
    let mut device = Device::new(
        SimRadio::new(app_key),
        SimTimers::default(),
        XorShift(0x1234_5678),
        config,
        MacConfig::new(Region::Eu868),
    );
    let mut queue: EventQueue<8> = EventQueue::new();
    let (mut producer, mut consumer) = queue.split();

    device.init()?;
    device.join_otaa()?;
    run(&mut device, &mut producer, &mut consumer)?;

    if device.get_session_state().dev_addr != DevAddr::new(ASSIGNED_ADDR) {
        println!("[app] join did not complete");
        return Ok(());
    }

    for counter in 0..3 {
        let message = format!("Hello, LoRaWAN! #{}", counter);
        match device.send_unconfirmed(1, message.as_bytes()) {
            Ok(()) => run(&mut device, &mut producer, &mut consumer)?,
            Err(e) => println!("[app] send failed: {:?}", e),
        }
    }

    let metrics = device.power().get_metrics();
    println!(
        "[app] {} transmissions, {} ms on air",
        metrics.tx_count,
        metrics.tx_time.as_millis()
    );
    Ok(())
}
