use super::buffer::TrackState;
use super::*;

use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::TrackSettings;

#[derive(Default)]
struct CountingWaker(AtomicUsize);

impl Awaken for CountingWaker {
    fn awaken(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl CountingWaker {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

fn settings(importer: &str, block_samples: usize, max_blocks: usize) -> TrackSettings {
    TrackSettings {
        importer: PathBuf::from(importer),
        rate: 44100,
        block_samples,
        max_blocks,
        ppm_res: 64,
        overview_res: 1024,
        abort_grace_ms: 1000,
    }
}

fn track(importer: &str, block_samples: usize, max_blocks: usize) -> (Track, Arc<CountingWaker>) {
    let waker = Arc::new(CountingWaker::default());
    let t = Track::new(&settings(importer, block_samples, max_blocks), waker.clone());
    (t, waker)
}

fn pcm_bytes(samples: &[[i16; 2]]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|[l, r]| l.to_ne_bytes().into_iter().chain(r.to_ne_bytes()))
        .collect()
}

/// Place bytes in the store from byte `offset` on, without committing them.
fn place(state: &mut TrackState, mut offset: usize, mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let region = state.store.acquire_write_region(offset).unwrap();
        let n = region.len().min(bytes.len());
        region[..n].copy_from_slice(&bytes[..n]);
        bytes = &bytes[n..];
        offset += n;
    }
}

/// Service the track's poll entry from this thread until the import ends.
fn pump(track: &Track) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while let Some(mut pe) = track.pollfd() {
        assert!(Instant::now() < deadline, "import did not conclude");
        // SAFETY: a single valid pollfd.
        let r = unsafe { libc::poll(&mut pe, 1, 100) };
        assert!(r >= 0, "poll failed: {}", std::io::Error::last_os_error());
        track.handle(pe.revents);
    }
}

/// Input that replays a fixed sequence of reads, then reports end of stream.
struct Scripted(VecDeque<io::Result<Vec<u8>>>);

impl Scripted {
    fn new(reads: Vec<io::Result<Vec<u8>>>) -> Self {
        Self(reads.into())
    }
}

impl Read for Scripted {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.pop_front() {
            Some(Ok(bytes)) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }
}

fn process_exists(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn write_raw(dir: &Path, name: &str, samples: &[[i16; 2]], extra: &[u8]) -> PathBuf {
    let path = dir.join(name);
    let mut bytes = pcm_bytes(samples);
    bytes.extend_from_slice(extra);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[test]
fn two_commits_fill_across_a_block_boundary() {
    let (t, _) = track("/bin/cat", 4096, 4);
    let loud = vec![[8000i16, -8000i16]; 5000];
    {
        let mut state = t.lock();
        place(&mut state, 0, &pcm_bytes(&loud));
        state.commit(3000 * SAMPLE);
        assert_eq!(state.length, 3000);
        state.commit(2000 * SAMPLE);
    }

    let status = t.status();
    assert_eq!(status.blocks, 2);
    assert_eq!(status.length, 5000);
    assert_eq!(status.bytes, 5000 * SAMPLE);
    assert_eq!(status.rate, 44100);

    // 5000 / 64 = 78 complete groups: 64 in the first block, 14 in the second.
    for group in 0..78 {
        let v = t.ppm(group * 64).unwrap();
        assert!(v > 0, "group {group} is empty");
    }
    assert!(t.ppm(4096).is_some());
    assert_eq!(t.ppm(78 * 64), None);

    // 5000 / 1024 = 4 overview entries.
    assert!(t.overview(3 * 1024).is_some());
    assert_eq!(t.overview(4 * 1024), None);

    assert_eq!(t.sample(4999), Some([8000, -8000]));
    assert_eq!(t.sample(5000), None);
}

#[test]
fn partial_samples_wait_for_their_remaining_bytes() {
    let (t, _) = track("/bin/cat", 4096, 1);
    let mut state = t.lock();
    place(&mut state, 0, &pcm_bytes(&[[1, 2]; 10]));

    state.commit(5);
    assert_eq!((state.bytes, state.length), (5, 1));
    state.commit(2);
    assert_eq!((state.bytes, state.length), (7, 1));
    state.commit(1);
    assert_eq!((state.bytes, state.length), (8, 2));
    state.commit(32);
    assert_eq!((state.bytes, state.length), (40, 10));
}

#[test]
fn length_tracks_whole_samples_for_any_chunking() {
    let (t, _) = track("/bin/cat", 256, 8);
    let mut state = t.lock();
    place(&mut state, 0, &vec![0x11u8; 256 * SAMPLE * 4]);

    let mut total = 0;
    let mut chunk = 1;
    while total + chunk <= 256 * SAMPLE * 4 {
        let before = state.length;
        state.commit(chunk);
        total += chunk;

        assert_eq!(state.bytes, total);
        assert!(state.length * SAMPLE <= state.bytes);
        assert_eq!(state.length - before, total / SAMPLE - before);

        chunk = chunk % 13 + 1;
    }
}

#[test]
fn block_allocation_stops_at_the_limit_without_touching_data() {
    let (t, _) = track("/bin/cat", 64, 2);
    let block_bytes = 64 * SAMPLE;
    {
        let mut state = t.lock();
        place(&mut state, 0, &pcm_bytes(&[[100, -100]; 128]));
        state.commit(128 * SAMPLE);

        assert_eq!(state.store.acquire_write_region(0).unwrap().len(), block_bytes);
        assert_eq!(
            state.store.acquire_write_region(block_bytes + 8).unwrap().len(),
            block_bytes - 8
        );

        let err = state.store.acquire_write_region(2 * block_bytes).unwrap_err();
        assert!(matches!(err, StoreError::LimitReached { max_blocks: 2 }));
        assert_eq!(state.store.len(), 2);
    }

    assert_eq!(t.sample(0), Some([100, -100]));
    assert_eq!(t.sample(127), Some([100, -100]));
    assert_eq!(t.status().length, 128);
}

#[test]
fn meters_attack_without_overshoot_and_decay_monotonically() {
    let (t, _) = track("/bin/cat", 8192, 4);
    let loud = 16_384;
    let silent = 8_192;
    let mut samples = vec![[8000i16, 8000i16]; loud];
    samples.extend(vec![[0i16, 0i16]; silent]);

    let mut state = t.lock();
    place(&mut state, 0, &pcm_bytes(&samples));

    let target = 16_000;
    let mut prev = 0;
    for _ in 0..loud {
        state.commit(SAMPLE);
        let level = state.ppm.level();
        assert!(level >= prev && level <= target);
        assert!(state.overview.level() <= target);
        prev = level;
    }
    assert_eq!(state.ppm.level(), target);
    let slow_peak = state.overview.level();
    assert!(slow_peak > target * 99 / 100);

    let mut prev_fast = state.ppm.level();
    let mut prev_slow = state.overview;
    for _ in 0..silent {
        state.commit(SAMPLE);
        let fast = state.ppm.level();
        assert!(fast < prev_fast || (fast == 0 && prev_fast == 0));
        assert!(state.overview.level() <= prev_slow.level());
        assert_ne!(state.overview, prev_slow);
        prev_fast = fast;
        prev_slow = state.overview;
    }

    assert_eq!(state.ppm.level(), 0);
    assert!(state.overview.level() > slow_peak * 9 / 10);
}

#[test]
fn import_streams_the_whole_file_into_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let samples: Vec<[i16; 2]> = (0..10_000).map(|n| [n as i16, -(n as i16)]).collect();
    let raw = write_raw(dir.path(), "a.raw", &samples, &[0xAA, 0xBB]);

    let (t, waker) = track("/bin/cat", 4096, 8);
    t.import(&raw).unwrap();
    assert!(t.is_importing());
    assert_eq!(waker.count(), 1);

    pump(&t);

    let status = t.status();
    assert!(!status.importing);
    assert_eq!(status.importer_pid, None);
    assert_eq!(status.bytes, 10_000 * SAMPLE + 2);
    assert_eq!(status.length, 10_000);
    assert_eq!(status.blocks, 3);
    assert_eq!(status.conclusion, Some(Conclusion::EndOfStream));
    assert_eq!(status.exit_ok, Some(true));

    assert_eq!(t.sample(0), Some([0, 0]));
    assert_eq!(t.sample(4096), Some([4096, -4096]));
    assert_eq!(t.sample(9_999), Some([9_999, -9_999]));
}

#[test]
fn unsuccessful_importer_exit_is_recorded_not_raised() {
    let (t, _) = track("/bin/false", 4096, 8);
    t.import("/nonexistent.mp3").unwrap();
    pump(&t);

    let status = t.status();
    assert!(!status.importing);
    assert_eq!(status.length, 0);
    assert_eq!(status.conclusion, Some(Conclusion::EndOfStream));
    assert_eq!(status.exit_ok, Some(false));
}

#[test]
fn missing_importer_fails_to_start_and_leaves_track_idle() {
    let (t, waker) = track("/nonexistent/platter-import", 4096, 8);
    let err = t.import("/tmp/whatever.flac").unwrap_err();

    assert!(matches!(err, ImportError::Spawn { .. }));
    assert!(!t.is_importing());
    assert_eq!(t.pollfd().map(|pe| pe.fd), None);
    assert_eq!(waker.count(), 0);
}

#[test]
fn running_out_of_blocks_truncates_the_import() {
    let dir = tempfile::tempdir().unwrap();
    let raw = write_raw(dir.path(), "long.raw", &vec![[500, 500]; 3000], &[]);

    let (t, _) = track("/bin/cat", 1024, 1);
    t.import(&raw).unwrap();
    pump(&t);

    let status = t.status();
    assert!(!status.importing);
    assert_eq!(status.conclusion, Some(Conclusion::OutOfSpace));
    assert_eq!(status.blocks, 1);
    assert_eq!(status.length, 1024);
    assert_eq!(t.sample(1023), Some([500, 500]));
}

#[test]
fn repeated_import_requests_leave_one_importer() {
    let (t, waker) = track("/bin/sleep", 4096, 8);

    t.import("30").unwrap();
    let first = t.status().importer_pid.unwrap();
    assert!(process_exists(first));

    t.import("30").unwrap();
    let second = t.status().importer_pid.unwrap();
    assert_ne!(first, second);
    assert!(!process_exists(first));
    assert!(process_exists(second));

    let status = t.status();
    assert_eq!(status.conclusion, None);
    assert_eq!(waker.count(), 2);

    drop(t);
    assert!(!process_exists(second));
}

#[test]
fn aborted_import_is_recorded_before_the_next_one_starts() {
    let (t, _) = track("/bin/sleep", 4096, 8);
    t.import("30").unwrap();

    let err = {
        let mut state = t.lock();
        let importer = state.import.take().unwrap();
        state.abort_import(importer, Some(Duration::from_secs(1)));
        assert_eq!(state.conclusion, Some(Conclusion::Aborted));
        assert_eq!(state.exit_ok, Some(false));
        state.start_import(Path::new("/nonexistent/platter-import"), Path::new("x"), 44100)
    };

    assert!(err.is_err());
    assert!(!t.is_importing());
}

#[test]
fn reimport_overwrites_existing_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_raw(dir.path(), "first.raw", &vec![[7, 7]; 9000], &[]);
    let second = write_raw(dir.path(), "second.raw", &vec![[-3, 3]; 100], &[]);

    let (t, _) = track("/bin/cat", 4096, 8);
    t.import(&first).unwrap();
    pump(&t);
    assert_eq!(t.status().blocks, 3);

    t.import(&second).unwrap();
    pump(&t);

    let status = t.status();
    assert_eq!(status.length, 100);
    assert_eq!(status.bytes, 100 * SAMPLE);
    assert_eq!(status.blocks, 3);
    assert_eq!(t.sample(0), Some([-3, 3]));
    assert_eq!(t.sample(100), None);
}

#[test]
fn teardown_from_any_state_leaves_no_process() {
    // Idle.
    let (t, _) = track("/bin/sleep", 4096, 8);
    drop(t);

    // Importing.
    let (t, _) = track("/bin/sleep", 4096, 8);
    t.import("30").unwrap();
    let pid = t.status().importer_pid.unwrap();
    drop(t);
    assert!(!process_exists(pid));

    // Just failed to start.
    let (t, _) = track("/nonexistent/platter-import", 4096, 8);
    assert!(t.import("x").is_err());
    drop(t);
}

#[test]
fn handle_ignores_quiet_poll_entries() {
    let (t, _) = track("/bin/sleep", 4096, 8);
    t.handle(0);
    t.handle(libc::POLLIN);

    t.import("30").unwrap();
    t.handle(0);
    assert!(t.is_importing());
}

#[test]
fn metadata_is_set_externally() {
    let (t, _) = track("/bin/cat", 4096, 1);
    assert_eq!(t.artist(), None);

    t.set_metadata(Some("Artist".to_string()), Some("Title".to_string()));
    assert_eq!(t.artist().as_deref(), Some("Artist"));
    assert_eq!(t.title().as_deref(), Some("Title"));
}

#[test]
fn drain_keeps_going_through_interrupts_and_stops_when_input_would_block() {
    let (t, _) = track("/bin/cat", 4096, 8);
    let mut state = t.lock();

    let mut input = Scripted::new(vec![
        Ok(pcm_bytes(&vec![[40, 40]; 100])),
        Err(io::ErrorKind::Interrupted.into()),
        Ok(pcm_bytes(&vec![[-40, -40]; 50])),
        Err(io::ErrorKind::WouldBlock.into()),
    ]);
    assert_eq!(state.drain_from(&mut input), Drain::Pending);
    assert_eq!(state.length, 150);

    // What is left is an empty stream.
    assert_eq!(state.drain_from(&mut input), Drain::Finished);
    assert_eq!(state.length, 150);
}

#[test]
fn read_error_concludes_the_import_and_keeps_committed_audio() {
    let (t, _) = track("/bin/true", 4096, 8);
    t.import("x").unwrap();

    let mut input = Scripted::new(vec![
        Ok(pcm_bytes(&vec![[9000, -9000]; 1500])),
        Err(io::Error::other("pipe went away")),
        Ok(pcm_bytes(&vec![[1, 1]; 10])),
    ]);
    {
        let mut state = t.lock();
        let drain = state.drain_from(&mut input);
        assert_eq!(drain, Drain::Failed);
        state.settle(drain);
    }

    let status = t.status();
    assert!(!status.importing);
    assert_eq!(status.conclusion, Some(Conclusion::ReadError));
    assert_eq!(status.exit_ok, Some(true));
    assert_eq!(status.length, 1500);
    assert_eq!(status.bytes, 1500 * SAMPLE);
    assert_eq!(t.sample(1499), Some([9000, -9000]));
    assert_eq!(t.sample(1500), None);
    assert!(t.ppm(0).unwrap() > 0);
    assert!(t.overview(0).unwrap() > 0);
}

#[test]
fn importer_ignoring_sigterm_is_killed_once_the_grace_period_ends() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("stubborn.sh");
    std::fs::write(&script, "trap '' TERM\nwhile true; do sleep 0.05; done\n").unwrap();

    let grace = Duration::from_millis(300);
    let short_grace = TrackSettings {
        abort_grace_ms: 300,
        ..settings("/bin/sh", 4096, 8)
    };
    let t = Track::new(&short_grace, Arc::new(CountingWaker::default()));

    t.import(&script).unwrap();
    let first = t.status().importer_pid.unwrap();
    // Let the shell install its trap before it is signalled.
    thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    t.import(&script).unwrap();
    let took = started.elapsed();

    assert!(!process_exists(first));
    assert!(took >= grace, "killed after {took:?}, before the grace period");
    assert!(took < grace + Duration::from_secs(2), "abort took {took:?}");

    let second = t.status().importer_pid.unwrap();
    assert_ne!(first, second);
    assert!(process_exists(second));

    thread::sleep(Duration::from_millis(200));
    drop(t);
    assert!(!process_exists(second));
}

#[test]
fn wait_idle_returns_once_another_thread_concludes_the_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_raw(dir.path(), "tone.raw", &vec![[500, -500]; 6000], &[]);

    let (t, _) = track("/bin/cat", 4096, 8);
    let t = Arc::new(t);
    assert!(t.wait_idle(Duration::ZERO));

    t.import(&path).unwrap();
    let io_thread = {
        let t = t.clone();
        thread::spawn(move || pump(&t))
    };

    assert!(t.wait_idle(Duration::from_secs(10)));
    io_thread.join().unwrap();

    let status = t.status();
    assert_eq!(status.conclusion, Some(Conclusion::EndOfStream));
    assert_eq!(status.length, 6000);
}

#[test]
fn wait_idle_times_out_while_the_importer_runs() {
    let (t, _) = track("/bin/sleep", 4096, 8);
    t.import("30").unwrap();

    let started = Instant::now();
    assert!(!t.wait_idle(Duration::from_millis(100)));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(t.is_importing());
}
