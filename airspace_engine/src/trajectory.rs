// Recorded tracks and trajectory result files.
//
// The engine appends one `TrackRow` per entity per propagation step. Writing
// trajectories produces a CSV at the requested path for aircraft and, when
// any ground vehicles exist, a second CSV next to it whose name is the first
// file's stem plus `_groundVehicleSimulation.csv`. Clients that download
// results rely on that naming rule to find the second file, so a write with
// no ground vehicles removes any sibling left by an earlier write.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Suffix that replaces the extension of the aircraft trajectory file.
pub const GROUND_VEHICLE_SUFFIX: &str = "_groundVehicleSimulation.csv";

#[derive(Clone, Debug, PartialEq)]
pub struct TrackRow {
    pub time_s: f64,
    pub id: String,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_ft: f64,
    pub speed_knots: f64,
    pub course_deg: f64,
}

/// Files produced by one `write_trajectories` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrajectoryFiles {
    pub aircraft: PathBuf,
    pub ground_vehicles: Option<PathBuf>,
}

/// `out/run1.csv` -> `out/run1_groundVehicleSimulation.csv`.
pub fn ground_vehicle_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{GROUND_VEHICLE_SUFFIX}"))
}

/// Delete `path` if present.
pub(crate) fn remove_stale(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

pub(crate) fn write_csv(path: &Path, rows: &[TrackRow]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(
        out,
        "time_s,id,latitude_deg,longitude_deg,altitude_ft,speed_knots,course_deg"
    )?;
    for row in rows {
        writeln!(
            out,
            "{:.3},{},{:.6},{:.6},{:.1},{:.2},{:.2}",
            row.time_s,
            row.id,
            row.latitude_deg,
            row.longitude_deg,
            row.altitude_ft,
            row.speed_knots,
            row.course_deg
        )?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_replaces_extension() {
        assert_eq!(
            ground_vehicle_sibling(Path::new("out/run1.csv")),
            PathBuf::from("out/run1_groundVehicleSimulation.csv")
        );
        assert_eq!(
            ground_vehicle_sibling(Path::new("traj")),
            PathBuf::from("traj_groundVehicleSimulation.csv")
        );
    }

    #[test]
    fn remove_stale_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.csv");
        remove_stale(&path).unwrap();
        std::fs::write(&path, b"old").unwrap();
        remove_stale(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn csv_has_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let rows = vec![TrackRow {
            time_s: 1.0,
            id: "AC1".into(),
            latitude_deg: 10.0,
            longitude_deg: 20.0,
            altitude_ft: 3000.0,
            speed_knots: 250.0,
            course_deg: 90.0,
        }];
        write_csv(&path, &rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("time_s,id"));
        assert!(lines[1].starts_with("1.000,AC1,10.000000,20.000000"));
    }
}
