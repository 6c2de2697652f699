//! Record a short simulated trail and submit it to an in-memory store.
//!
//! Run with: cargo run --example record_trail

use std::sync::{Arc, Mutex};

use trail_recorder::{
    format_distance_km, format_duration_minutes, Fix, FixError, LocationHardware,
    PositionOptions, PushPositionSource, StoreError, TrackSession, TrailError, TrailId,
    TrailRecord, TrailStore, TrailSubmitter,
};

/// Pretend GPS chip that just reports when it is switched on and off.
struct SimulatedGps;

impl LocationHardware for SimulatedGps {
    fn engage(&self, options: &PositionOptions) -> Result<(), TrailError> {
        println!("   GPS on (high accuracy: {}, timeout: {}ms)", options.high_accuracy, options.timeout_ms);
        Ok(())
    }

    fn release(&self) {
        println!("   GPS off");
    }
}

/// Stores payloads in memory instead of calling the trail API.
#[derive(Default)]
struct PrintingStore {
    saved: Mutex<Vec<String>>,
}

impl TrailStore for PrintingStore {
    async fn create_trail(&self, record: &TrailRecord) -> Result<TrailId, StoreError> {
        let json = record.to_json().map_err(|e| StoreError::Decode(e.to_string()))?;
        let mut saved = self.saved.lock().unwrap();
        saved.push(json);
        Ok(format!("demo-{}", saved.len()))
    }
}

#[tokio::main]
async fn main() {
    println!("Trail Recording Example\n");

    let source = Arc::new(PushPositionSource::new(SimulatedGps));
    let mut session = TrackSession::new(source.clone(), PositionOptions::default())
        .with_advisory(Arc::new(|err: &FixError| println!("   advisory: {}", err)));

    println!("1. Start recording");
    session.start().expect("GPS available");

    println!("2. Walk along the Thames (London)");
    let walk = [
        (51.5074, -0.1278),
        (51.5080, -0.1290),
        (51.5090, -0.1300),
        (51.5100, -0.1310),
        (51.5110, -0.1320),
    ];
    for (i, (lat, lon)) in walk.iter().enumerate() {
        if i == 2 {
            source.push_error(FixError::Timeout);
        }
        source.push_fix(Fix::new(*lat, *lon).with_accuracy(5.0));
    }
    println!("   {} points recorded", session.points_recorded());

    println!("3. Stop recording");
    session.stop();

    let track = session.stopped_track().expect("session is stopped");
    let minutes = track.duration_minutes().expect("clock moved forward");
    println!(
        "   distance: {}, duration: {}, failed fixes: {}\n",
        format_distance_km(track.distance_km()),
        format_duration_minutes(minutes as f64),
        track.fix_errors()
    );

    println!("4. Submit");
    let store = Arc::new(PrintingStore::default());
    let submitter = TrailSubmitter::new(Arc::clone(&store));
    match session.submit(&submitter).await {
        Ok(id) => println!("   saved as {}", id),
        Err(e) => println!("   failed: {}", e),
    }

    for json in store.saved.lock().unwrap().iter() {
        println!("   payload: {}", json);
    }
}
