//! Synthetic Traffic Aggregation Benchmark
//!
//! Generates TCP/UDP packets spread over a configurable number of flows and
//! measures the packet path (hash, chain walk, field aggregation) plus the
//! periodic expiry scan.

use std::time::{Duration, Instant};

use clap::Parser;

use flowmeter::{
    iana, AggregatorConfig, IeInfo, PacketAggregator, RawPacket, RecordSchema, SchemaField,
    TransportProtocol,
};

#[derive(Parser, Debug)]
#[command(name = "aggregation")]
#[command(about = "Benchmark the packet-to-flow aggregation path")]
struct Args {
    /// Packets to process
    #[arg(short, long, default_value = "1000000")]
    packets: usize,

    /// Number of distinct flows the packets are spread over
    #[arg(short, long, default_value = "10000")]
    flows: usize,

    /// Hash table size as a power of two
    #[arg(long, default_value = "17")]
    hash_bits: u8,

    /// Enable biflow matching
    #[arg(long)]
    biflow: bool,

    /// Warmup packets before measuring
    #[arg(long, default_value = "10000")]
    warmup: usize,

    /// Run the expiry scan every N packets
    #[arg(long, default_value = "10000")]
    expire_every: usize,

    /// Payload bytes per packet
    #[arg(long, default_value = "64")]
    payload: usize,
}

#[derive(Debug, Default)]
struct TimingStats {
    count: u64,
    sum_ns: u64,
    max_ns: u64,
}

impl TimingStats {
    fn record(&mut self, duration: Duration) {
        let ns = duration.as_nanos() as u64;
        self.count += 1;
        self.sum_ns += ns;
        if ns > self.max_ns {
            self.max_ns = ns;
        }
    }

    fn mean_ns(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_ns as f64 / self.count as f64
        }
    }
}

fn schema() -> RecordSchema {
    RecordSchema::new(256)
        .with_field(SchemaField::keep(IeInfo::iana(iana::SOURCE_IPV4_ADDRESS), 5))
        .with_field(SchemaField::keep(IeInfo::iana(iana::DESTINATION_IPV4_ADDRESS), 5))
        .with_field(SchemaField::keep(IeInfo::iana(iana::SOURCE_TRANSPORT_PORT), 2))
        .with_field(SchemaField::keep(IeInfo::iana(iana::DESTINATION_TRANSPORT_PORT), 2))
        .with_field(SchemaField::keep(IeInfo::iana(iana::PROTOCOL_IDENTIFIER), 1))
        .with_field(SchemaField::keep(IeInfo::iana(iana::PACKET_DELTA_COUNT), 8))
        .with_field(SchemaField::keep(IeInfo::iana(iana::OCTET_DELTA_COUNT), 8))
        .with_field(SchemaField::keep(IeInfo::iana(iana::TCP_CONTROL_BITS), 1))
        .with_field(SchemaField::keep(IeInfo::iana(iana::FLOW_START_MILLISECONDS), 8))
        .with_field(SchemaField::keep(IeInfo::iana(iana::FLOW_END_MILLISECONDS), 8))
}

/// xorshift, good enough to spread flows over the table
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}

fn synth_packet(flow: usize, sec: u32, payload_len: usize) -> RawPacket {
    let mut data = vec![0u8; 40];
    let total = (40 + payload_len) as u16;
    data[2..4].copy_from_slice(&total.to_be_bytes());
    data[9] = 6;
    data[12..16].copy_from_slice(&[10, (flow >> 16) as u8, (flow >> 8) as u8, flow as u8]);
    data[16..20].copy_from_slice(&[192, 168, 0, 1]);
    data[20..22].copy_from_slice(&(1024 + (flow % 50000) as u16).to_be_bytes());
    data[22..24].copy_from_slice(&443u16.to_be_bytes());
    data[33] = 0x18; // PSH|ACK
    data.resize(40 + payload_len, 0xab);
    let payload_offset = if payload_len == 0 { 20 } else { 40 };
    RawPacket::new(data, TransportProtocol::Tcp, 20, payload_offset, sec, 0, 1)
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AggregatorConfig {
        min_buffer_time: 30,
        max_buffer_time: 300,
        hash_bits: args.hash_bits,
        biflow: args.biflow,
    };
    let mut agg = match PacketAggregator::new(&schema(), config) {
        Ok(agg) => agg,
        Err(e) => {
            eprintln!("failed to build aggregator: {}", e);
            std::process::exit(1);
        }
    };

    println!("Aggregation Benchmark");
    println!("=====================");
    println!("Packets:    {}", args.packets);
    println!("Flows:      {}", args.flows);
    println!("Table size: 2^{}", args.hash_bits);
    println!("Biflow:     {}", args.biflow);
    println!();

    let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
    let mut packet_timing = TimingStats::default();
    let mut expire_timing = TimingStats::default();
    let mut records_out = 0usize;
    let mut bytes = 0u64;
    let base_sec = 1_700_000_000u32;

    let start = Instant::now();
    for i in 0..args.warmup + args.packets {
        let flow = (rng.next() as usize) % args.flows;
        // one simulated second per thousand packets
        let sec = base_sec + (i / 1000) as u32;
        let p = synth_packet(flow, sec, args.payload);
        let warmup = i < args.warmup;

        let t = Instant::now();
        if agg.aggregate_packet(&p).is_some() {
            records_out += 1;
        }
        if !warmup {
            packet_timing.record(t.elapsed());
            bytes += p.data.len() as u64;
        }

        if i % args.expire_every == 0 {
            let t = Instant::now();
            records_out += agg.expire_flows(sec, false).len();
            if !warmup {
                expire_timing.record(t.elapsed());
            }
        }
    }
    records_out += agg.expire_flows(0, true).len();
    let elapsed = start.elapsed();

    let stats = agg.stats;
    println!("Results");
    println!("-------");
    println!("Total time:        {:>12.2?}", elapsed);
    println!(
        "Throughput:        {:>12.0} pkt/s",
        args.packets as f64 / elapsed.as_secs_f64()
    );
    println!(
        "Throughput:        {:>12.2} Mbps",
        (bytes as f64 * 8.0) / elapsed.as_secs_f64() / 1_000_000.0
    );
    println!(
        "Packet path:       {:>12.0} ns avg, {} ns max",
        packet_timing.mean_ns(),
        packet_timing.max_ns
    );
    println!(
        "Expiry scan:       {:>12.0} ns avg, {} ns max",
        expire_timing.mean_ns(),
        expire_timing.max_ns
    );
    println!();
    println!("Records emitted:   {:>12}", records_out);
    println!("Buckets created:   {:>12}", stats.buckets_created);
    println!("Chained inserts:   {:>12}", stats.multi_entry_slots);
    println!("Forced exports:    {:>12}", stats.forced_exports);
}
