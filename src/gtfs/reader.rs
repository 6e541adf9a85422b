//! GTFS feed reader, grounded in the teacher's `gtfs/raw_gtfs.rs` +
//! `gtfs/gtfs.rs` pair: `raw_gtfs.rs`'s per-file CSV deserialization is
//! kept, its zip-archive branch (previously `panic!("Not yet
//! implemented")`) is filled in using the `zip` crate, and `gtfs.rs`'s
//! cross-referencing (trips carrying their own sorted stop times, shapes
//! grouped and sorted by sequence) is kept as the shape this module
//! exposes to the match engine.

use std::collections::HashMap;
use std::convert::TryFrom;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::gtfs::error::{Error, LineError};
use crate::gtfs::structs::*;

/// Raw, unwired GTFS tables as read straight off disk. Optional files
/// that were absent read back as `None`; optional files that were present
/// but failed to parse still surface as `Some(Err(..))` so the caller can
/// decide whether to treat them as fatal.
pub struct GtfsDataSet {
    pub agencies: Result<Vec<Agency>, Error>,
    pub stops: Result<Vec<Stop>, Error>,
    pub routes: Result<Vec<Route>, Error>,
    pub trips: Result<Vec<Trip>, Error>,
    pub stop_times: Result<Vec<StopTime>, Error>,
    pub calendar: Option<Result<Vec<Calendar>, Error>>,
    pub calendar_dates: Option<Result<Vec<CalendarDate>, Error>>,
    pub shapes: Option<Result<Vec<Shape>, Error>>,
    pub frequencies: Option<Result<Vec<Frequency>, Error>>,
    pub transfers: Option<Result<Vec<Transfer>, Error>>,
    pub pathways: Option<Result<Vec<Pathway>, Error>>,
    pub feed_info: Option<Result<Vec<FeedInfo>, Error>>,
}

impl GtfsDataSet {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<GtfsDataSet, Error> {
        let p = path.as_ref();
        if p.is_dir() {
            Self::read_from_dir(p)
        } else if p.is_file() {
            Self::read_from_zip(p)
        } else {
            Err(Error::NotFileNorDirectory(format!("{}", p.display())))
        }
    }

    fn read_from_dir(path: &Path) -> Result<GtfsDataSet, Error> {
        Ok(GtfsDataSet {
            agencies: Self::read_obj_from_path(path, "agency.txt"),
            stops: Self::read_obj_from_path(path, "stops.txt"),
            routes: Self::read_obj_from_path(path, "routes.txt"),
            trips: Self::read_obj_from_path(path, "trips.txt"),
            stop_times: Self::read_obj_from_path(path, "stop_times.txt"),
            calendar: Self::optional_read_obj_from_path(path, "calendar.txt"),
            calendar_dates: Self::optional_read_obj_from_path(path, "calendar_dates.txt"),
            shapes: Self::optional_read_obj_from_path(path, "shapes.txt"),
            frequencies: Self::optional_read_obj_from_path(path, "frequencies.txt"),
            transfers: Self::optional_read_obj_from_path(path, "transfers.txt"),
            pathways: Self::optional_read_obj_from_path(path, "pathways.txt"),
            feed_info: Self::optional_read_obj_from_path(path, "feed_info.txt"),
        })
    }

    fn read_from_zip(path: &Path) -> Result<GtfsDataSet, Error> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;

        Ok(GtfsDataSet {
            agencies: Self::read_obj_from_zip(&mut archive, "agency.txt").ok_or(Error::MissingFile("agency.txt".into()))?,
            stops: Self::read_obj_from_zip(&mut archive, "stops.txt").ok_or(Error::MissingFile("stops.txt".into()))?,
            routes: Self::read_obj_from_zip(&mut archive, "routes.txt").ok_or(Error::MissingFile("routes.txt".into()))?,
            trips: Self::read_obj_from_zip(&mut archive, "trips.txt").ok_or(Error::MissingFile("trips.txt".into()))?,
            stop_times: Self::read_obj_from_zip(&mut archive, "stop_times.txt")
                .ok_or(Error::MissingFile("stop_times.txt".into()))?,
            calendar: Self::read_obj_from_zip(&mut archive, "calendar.txt"),
            calendar_dates: Self::read_obj_from_zip(&mut archive, "calendar_dates.txt"),
            shapes: Self::read_obj_from_zip(&mut archive, "shapes.txt"),
            frequencies: Self::read_obj_from_zip(&mut archive, "frequencies.txt"),
            transfers: Self::read_obj_from_zip(&mut archive, "transfers.txt"),
            pathways: Self::read_obj_from_zip(&mut archive, "pathways.txt"),
            feed_info: Self::read_obj_from_zip(&mut archive, "feed_info.txt"),
        })
    }

    fn read_obj_from_path<O>(path: &Path, file_name: &str) -> Result<Vec<O>, Error>
    where
        for<'de> O: Deserialize<'de>,
    {
        let p = path.join(file_name);
        if !p.exists() {
            return Err(Error::MissingFile(file_name.to_owned()));
        }
        File::open(p)
            .map_err(|e| Error::NamedFileIO { file_name: file_name.to_owned(), source: Box::new(e) })
            .and_then(|r| Self::read_obj(r, file_name))
    }

    fn optional_read_obj_from_path<O>(path: &Path, file_name: &str) -> Option<Result<Vec<O>, Error>>
    where
        for<'de> O: Deserialize<'de>,
    {
        File::open(path.join(file_name)).ok().map(|r| Self::read_obj(r, file_name))
    }

    /// Returns `None` if `file_name` is absent from the archive (mandatory
    /// files are turned into `Error::MissingFile` by the caller).
    fn read_obj_from_zip<O>(archive: &mut zip::ZipArchive<File>, file_name: &str) -> Option<Result<Vec<O>, Error>>
    where
        for<'de> O: Deserialize<'de>,
    {
        let mut entry = archive.by_name(file_name).ok()?;
        let mut buf = Vec::new();
        if let Err(e) = entry.read_to_end(&mut buf) {
            return Some(Err(Error::NamedFileIO { file_name: file_name.to_owned(), source: Box::new(e) }));
        }
        Some(Self::read_obj(std::io::Cursor::new(buf), file_name))
    }

    fn read_obj<T, O>(mut reader: T, file_name: &str) -> Result<Vec<O>, Error>
    where
        for<'de> O: Deserialize<'de>,
        T: std::io::Read,
    {
        let mut bom = [0; 3];
        let has_bom = reader.read_exact(&mut bom).is_ok() && bom == [0xefu8, 0xbbu8, 0xbfu8];
        let chained: Box<dyn std::io::Read> = if has_bom {
            Box::new(reader)
        } else {
            Box::new(bom.chain(reader))
        };

        let mut csv_reader = csv::ReaderBuilder::new().flexible(true).trim(csv::Trim::All).from_reader(chained);
        let headers = csv_reader
            .headers()
            .map_err(|e| Error::CSVError { file_name: file_name.to_owned(), source: e, line_in_error: None })?
            .clone();

        let mut rec = csv::StringRecord::new();
        let mut objs = Vec::new();
        while csv_reader
            .read_record(&mut rec)
            .map_err(|e| Error::CSVError { file_name: file_name.to_owned(), source: e, line_in_error: None })?
        {
            let obj = rec.deserialize(Some(&headers)).map_err(|e| Error::CSVError {
                file_name: file_name.to_owned(),
                source: e,
                line_in_error: Some(LineError {
                    headers: headers.iter().map(String::from).collect(),
                    values: rec.iter().map(String::from).collect(),
                }),
            })?;
            objs.push(obj);
        }
        Ok(objs)
    }
}

/// Fully cross-referenced GTFS feed: trips carry their own stop times in
/// sequence order, shapes are grouped by id and sorted by point sequence.
/// This is what the rest of the crate (the subnet/path-engine glue) reads
/// from.
#[derive(Default)]
pub struct GtfsData {
    pub stops: HashMap<String, Arc<Stop>>,
    pub routes: HashMap<String, Route>,
    pub trips: HashMap<String, Trip>,
    pub agencies: Vec<Agency>,
    pub shapes: HashMap<String, Vec<Shape>>,
    pub calendar: HashMap<String, Calendar>,
    pub calendar_dates: HashMap<String, Vec<CalendarDate>>,
    pub feed_info: Vec<FeedInfo>,
}

impl GtfsData {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<GtfsData, Error> {
        GtfsDataSet::from_path(path).and_then(GtfsData::try_from)
    }
}

impl TryFrom<GtfsDataSet> for GtfsData {
    type Error = Error;

    fn try_from(raw: GtfsDataSet) -> Result<GtfsData, Error> {
        let stops = to_stop_map(
            raw.stops?,
            raw.transfers.unwrap_or_else(|| Ok(Vec::new()))?,
            raw.pathways.unwrap_or_else(|| Ok(Vec::new()))?,
        )?;
        let trips = to_trips_map(
            raw.trips?,
            raw.stop_times?,
            raw.frequencies.unwrap_or_else(|| Ok(Vec::new()))?,
            &stops,
        )?;

        Ok(GtfsData {
            stops,
            routes: to_map(raw.routes?),
            trips,
            agencies: raw.agencies?,
            shapes: to_shape_map(raw.shapes.unwrap_or_else(|| Ok(Vec::new()))?),
            calendar: to_map(raw.calendar.unwrap_or_else(|| Ok(Vec::new()))?),
            calendar_dates: to_calendar_dates(raw.calendar_dates.unwrap_or_else(|| Ok(Vec::new()))?),
            feed_info: raw.feed_info.unwrap_or_else(|| Ok(Vec::new()))?,
        })
    }
}

fn to_map<O: Id>(elements: impl IntoIterator<Item = O>) -> HashMap<String, O> {
    elements.into_iter().map(|e| (e.id().to_owned(), e)).collect()
}

fn to_stop_map(stops: Vec<Stop>, transfers: Vec<Transfer>, pathways: Vec<Pathway>) -> Result<HashMap<String, Arc<Stop>>, Error> {
    let mut stop_map: HashMap<String, Stop> = stops.into_iter().map(|s| (s.stop_id.clone(), s)).collect();

    for transfer in transfers {
        if !stop_map.contains_key(&transfer.to_stop_id) {
            return Err(Error::ReferenceError(format!("'{}' in transfers.txt", transfer.to_stop_id)));
        }
        stop_map.entry(transfer.from_stop_id.clone()).and_modify(|s| s.transfers.push(transfer));
    }

    for pathway in pathways {
        if !stop_map.contains_key(&pathway.to_stop_id) {
            return Err(Error::ReferenceError(format!("'{}' in pathways.txt", pathway.to_stop_id)));
        }
        stop_map.entry(pathway.from_stop_id.clone()).and_modify(|s| s.pathways.push(pathway));
    }

    Ok(stop_map.into_iter().map(|(id, s)| (id, Arc::new(s))).collect())
}

fn to_shape_map(shapes: Vec<Shape>) -> HashMap<String, Vec<Shape>> {
    let mut res: HashMap<String, Vec<Shape>> = HashMap::new();
    for s in shapes {
        res.entry(s.shape_id.clone()).or_default().push(s);
    }
    for shapes in res.values_mut() {
        shapes.sort_by_key(|s| s.shape_pt_sequence);
    }
    res
}

fn to_trips_map(
    raw_trips: Vec<Trip>,
    mut stop_times: Vec<StopTime>,
    frequencies: Vec<Frequency>,
    stops: &HashMap<String, Arc<Stop>>,
) -> Result<HashMap<String, Trip>, Error> {
    let mut trips = to_map(raw_trips);

    while let Some(mut s) = stop_times.pop() {
        let trip = trips.get_mut(&s.trip_id).ok_or_else(|| Error::ReferenceError(s.trip_id.clone()))?;
        let stop = stops.get(&s.stop_id).ok_or_else(|| Error::ReferenceError(s.stop_id.clone()))?;
        s.stop = stop.clone();
        trip.stop_times.push(s);
    }

    for trip in trips.values_mut() {
        trip.stop_times.sort_by(|a, b| a.stop_sequence.cmp(&b.stop_sequence));
    }

    for f in frequencies {
        let trip = trips.get_mut(&f.trip_id).ok_or_else(|| Error::ReferenceError(f.trip_id.clone()))?;
        trip.frequencies.push(f);
    }

    Ok(trips)
}

fn to_calendar_dates(cd: Vec<CalendarDate>) -> HashMap<String, Vec<CalendarDate>> {
    let mut res: HashMap<String, Vec<CalendarDate>> = HashMap::new();
    for c in cd {
        res.entry(c.service_id.clone()).or_default().push(c);
    }
    res
}
