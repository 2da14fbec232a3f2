use std::{
    cell::RefCell,
    collections::HashMap,
    io::{Error as IoError, ErrorKind},
    rc::Rc,
    sync::mpsc::{Receiver, Sender, channel},
    thread,
};

use dyn_clone::DynClone;
use uuid::Uuid;

use crate::{
    backtest::{
        BacktestError,
        data::{
            Data,
            POD,
            npy::{NpyDTyped, read_npy_file, read_npz_file},
        },
    },
    types::Event,
};

/// Data source for the [`Reader`].
#[derive(Clone, Debug)]
pub enum DataSource<D>
where
    D: POD + Clone,
{
    /// Data needs to be loaded from the specified file. It will be loaded when needed and released
    /// when no [Processor](`crate::backtest::proc::Processor`) is reading the data.
    File(String),
    /// Data is loaded and set by the user.
    Data(Data<D>),
}

#[derive(Debug)]
struct CachedData<D>
where
    D: POD + Clone,
{
    count: usize,
    ready: bool,
    data: Data<D>,
}

impl<D> CachedData<D>
where
    D: POD + Clone,
{
    pub fn new(data: Data<D>) -> Self {
        Self {
            count: 0,
            ready: true,
            data,
        }
    }

    pub fn empty() -> Self {
        Self {
            count: 0,
            ready: false,
            data: Data::empty(),
        }
    }

    pub fn set(&mut self, data: Data<D>) {
        self.data = data;
    }

    pub fn checkout(&mut self) -> Data<D> {
        self.count += 1;
        self.data.clone()
    }

    pub fn turn_in(&mut self) -> bool {
        self.count -= 1;
        self.count == 0
    }
}

/// Provides a data cache that allows both the local processor and exchange processor to access the
/// same or different data based on their timestamps without the need for reloading.
#[derive(Clone, Debug)]
pub struct Cache<D>(Rc<RefCell<HashMap<String, CachedData<D>>>>)
where
    D: POD + Clone;

impl<D> Cache<D>
where
    D: POD + Clone,
{
    /// Constructs an instance of `Cache`.
    pub fn new() -> Self {
        Self(Default::default())
    }

    /// Inserts a key-value pair into the `Cache`.
    pub fn insert(&mut self, key: String, data: Data<D>) {
        self.0.borrow_mut().insert(key, CachedData::new(data));
    }

    /// Prepares cached data by inserting a key-value pair with empty data into the `Cache`.
    /// This placeholder will be replaced when the actual data is ready.
    pub fn prepare(&mut self, key: String) {
        self.0.borrow_mut().insert(key, CachedData::empty());
    }

    /// Removes the [`Data`] if all retrieved [`Data`] are released.
    pub fn remove(&mut self, data: Data<D>) {
        let mut remove = None;
        for (key, cached_data) in self.0.borrow_mut().iter_mut() {
            if data.data_eq(&cached_data.data) {
                if cached_data.turn_in() {
                    remove = Some(key.clone());
                }
                break;
            }
        }
        if let Some(key) = remove {
            self.0.borrow_mut().remove(&key).unwrap();
        }
    }

    /// Returns `true` if the `Cache` contains the [`Data`] for the specified key.
    pub fn contains(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    /// Returns the [`Data`] corresponding to the key.
    pub fn get(&mut self, key: &str) -> Data<D> {
        let mut borrowed = self.0.borrow_mut();
        let cached_data = borrowed.get_mut(key).unwrap();
        cached_data.checkout()
    }

    pub fn set(&mut self, key: &str, data: Data<D>) {
        let mut borrowed = self.0.borrow_mut();
        let cached_data = borrowed.get_mut(key).unwrap();
        cached_data.set(data);
        cached_data.ready = true;
    }

    pub fn is_ready(&self, key: &str) -> bool {
        self.0.borrow().get(key).unwrap().ready
    }
}

impl<D> Default for Cache<D>
where
    D: POD + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// DataPreprocess offers a function to preprocess data before it is fed into the backtesting. This
/// feature is primarily introduced to adjust timestamps, making it particularly useful when
/// backtesting the market from a location different from where your order latency was originally
/// collected.
///
/// For example, if you're backtesting an arbitrage strategy between two different exchanges and
/// your order latency data was collected in a colocated region, you may need to adjust for the
/// geographical difference between where your strategy actually runs and where the latency was
/// measured.
pub trait DataPreprocess<D>: DynClone
where
    D: POD + Clone,
{
    fn preprocess(&mut self, data: &mut Data<D>) -> Result<(), IoError>;
}

dyn_clone::clone_trait_object!(<D> DataPreprocess<D> where D: POD + Clone);

#[derive(Clone, Default)]
pub struct NullPreprocessor;

impl<D> DataPreprocess<D> for NullPreprocessor
where
    D: POD + Clone,
{
    fn preprocess(&mut self, _data: &mut Data<D>) -> Result<(), IoError> {
        Ok(())
    }
}

/// Adjusts the local timestamp of every feed event by a constant offset, so that feed data
/// recorded at one location can be replayed as though it had been observed at another.
#[derive(Clone)]
pub struct FeedLatencyAdjustment {
    latency_offset: i64,
}

impl FeedLatencyAdjustment {
    pub fn new(latency_offset: i64) -> Self {
        Self { latency_offset }
    }
}

impl DataPreprocess<Event> for FeedLatencyAdjustment {
    fn preprocess(&mut self, data: &mut Data<Event>) -> Result<(), IoError> {
        for i in 0..data.len() {
            data[i].local_ts += self.latency_offset;
            if data[i].local_ts <= data[i].exch_ts {
                return Err(IoError::new(
                    ErrorKind::InvalidData,
                    "`local_ts` became less than or \
                    equal to `exch_ts` after applying the latency offset",
                ));
            }
        }
        Ok(())
    }
}

struct DataSend<D>(Data<D>)
where
    D: NpyDTyped + Clone;

impl<D> DataSend<D>
where
    D: NpyDTyped + Clone,
{
    pub fn unwrap(self) -> Data<D> {
        self.0
    }
}
unsafe impl<D> Send for DataSend<D> where D: NpyDTyped + Clone {}

struct LoadDataResult<D>
where
    D: NpyDTyped + Clone,
{
    filepath: String,
    result: Result<DataSend<D>, IoError>,
}

impl<D> LoadDataResult<D>
where
    D: NpyDTyped + Clone,
{
    pub fn ok(filepath: String, data: Data<D>) -> Self {
        Self {
            filepath,
            result: Ok(DataSend(data)),
        }
    }

    pub fn err(filepath: String, err: IoError) -> Self {
        Self {
            filepath,
            result: Err(err),
        }
    }
}

/// Sequentially loads each data source only when it is first requested, blocking the caller while
/// the file is read from disk.
#[derive(Clone)]
struct Sequential<D>
where
    D: NpyDTyped + Clone,
{
    file_list: Vec<String>,
    cache: Cache<D>,
    data_num: usize,
    preprocessor: Box<dyn DataPreprocess<D>>,
}

/// Loads the next two data sources concurrently on background threads, so that by the time the
/// current file's data is consumed, the following file has likely already finished loading.
#[derive(Clone)]
struct Parallel<D>
where
    D: NpyDTyped + Clone,
{
    file_list: Vec<String>,
    cache: Cache<D>,
    data_num: usize,
    tx: Sender<LoadDataResult<D>>,
    rx: Rc<Receiver<LoadDataResult<D>>>,
}

#[derive(Clone)]
enum ReaderImpl<D>
where
    D: NpyDTyped + Clone,
{
    Sequential(Sequential<D>),
    Parallel(Parallel<D>),
}

/// Reads a sequence of [`DataSource`]s, either files or in-memory [`Data`], one at a time,
/// optionally prefetching in the background. Constructed through [`ReaderBuilder`].
///
/// Cloning a `Reader` creates an independent read cursor (`data_num`) over the same underlying
/// [`Cache`], which is shared via reference counting. This lets the local and exchange processors
/// of an [`Asset`](crate::backtest::Asset) walk the same file sequence at their own pace without
/// reloading from disk.
#[derive(Clone)]
pub struct Reader<D>(ReaderImpl<D>)
where
    D: NpyDTyped + Clone;

impl<D> Reader<D>
where
    D: NpyDTyped + Clone + Send + 'static,
{
    /// Returns a [`ReaderBuilder`] to configure and construct a `Reader`.
    pub fn builder() -> ReaderBuilder<D> {
        ReaderBuilder::new()
    }

    /// Releases this `Data` from the underlying cache. The cache will delete the `Data` if there
    /// are no readers accessing it.
    pub fn release(&mut self, data: Data<D>) {
        match &mut self.0 {
            ReaderImpl::Sequential(r) => r.cache.remove(data),
            ReaderImpl::Parallel(r) => r.cache.remove(data),
        }
    }

    /// Retrieves the next `Data` based on the order the data sources were added in.
    pub fn next_data(&mut self) -> Result<Data<D>, BacktestError> {
        match &mut self.0 {
            ReaderImpl::Sequential(r) => {
                if r.data_num < r.file_list.len() {
                    let filepath = r.file_list.get(r.data_num).unwrap().clone();
                    if !r.cache.contains(&filepath) {
                        let mut data = read_source_file(&filepath)?;
                        r.preprocessor
                            .preprocess(&mut data)
                            .map_err(BacktestError::DataError)?;
                        r.cache.insert(filepath.clone(), data);
                    }
                    let data = r.cache.get(&filepath);
                    r.data_num += 1;
                    Ok(data)
                } else {
                    Err(BacktestError::EndOfData)
                }
            }
            ReaderImpl::Parallel(r) => {
                if r.data_num < r.file_list.len() {
                    let filepath = r.file_list.get(r.data_num).cloned().unwrap();
                    let next_filepath = r.file_list.get(r.data_num + 1).cloned();

                    load_data_async(r, &filepath)?;
                    if let Some(next_filepath) = next_filepath {
                        load_data_async(r, &next_filepath)?;
                    }

                    while !r.cache.is_ready(&filepath) {
                        match r.rx.recv().unwrap() {
                            LoadDataResult {
                                filepath,
                                result: Ok(data),
                            } => {
                                r.cache.set(&filepath, data.unwrap());
                            }
                            LoadDataResult {
                                result: Err(err), ..
                            } => {
                                return Err(BacktestError::DataError(err));
                            }
                        }
                    }

                    let data = r.cache.get(&filepath);
                    r.data_num += 1;
                    Ok(data)
                } else {
                    Err(BacktestError::EndOfData)
                }
            }
        }
    }
}

fn read_source_file<D: NpyDTyped + Clone>(filepath: &str) -> Result<Data<D>, BacktestError> {
    if filepath.ends_with(".npy") {
        read_npy_file(filepath).map_err(BacktestError::DataError)
    } else if filepath.ends_with(".npz") {
        read_npz_file(filepath, "data").map_err(BacktestError::DataError)
    } else {
        Err(BacktestError::DataError(IoError::new(
            ErrorKind::InvalidData,
            "unsupported data type",
        )))
    }
}

fn load_data_async<D>(r: &mut Parallel<D>, filepath: &str) -> Result<(), BacktestError>
where
    D: NpyDTyped + Clone + Send + 'static,
{
    if !r.cache.contains(filepath) {
        r.cache.prepare(filepath.to_string());

        if filepath.ends_with(".npy") {
            let tx = r.tx.clone();
            let filepath_ = filepath.to_string();
            let _ = thread::spawn(move || match read_npy_file::<D>(&filepath_) {
                Ok(data) => {
                    tx.send(LoadDataResult::ok(filepath_, data)).unwrap();
                }
                Err(err) => {
                    tx.send(LoadDataResult::err(filepath_, err)).unwrap();
                }
            });
        } else if filepath.ends_with(".npz") {
            let tx = r.tx.clone();
            let filepath_ = filepath.to_string();
            let _ = thread::spawn(move || match read_npz_file::<D>(&filepath_, "data") {
                Ok(data) => {
                    tx.send(LoadDataResult::ok(filepath_, data)).unwrap();
                }
                Err(err) => {
                    tx.send(LoadDataResult::err(filepath_, err)).unwrap();
                }
            });
        } else {
            return Err(BacktestError::DataError(IoError::new(
                ErrorKind::InvalidData,
                "unsupported data type",
            )));
        }
    }
    Ok(())
}

/// Builds a [`Reader`], configuring its data sources, cache, and preprocessing step, and choosing
/// between sequential (default) and parallel prefetching.
pub struct ReaderBuilder<D>
where
    D: NpyDTyped + Clone,
{
    parallel_load: bool,
    cache: Cache<D>,
    data: Vec<DataSource<D>>,
    preprocessor: Box<dyn DataPreprocess<D>>,
}

impl<D> Default for ReaderBuilder<D>
where
    D: NpyDTyped + Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<D> ReaderBuilder<D>
where
    D: NpyDTyped + Clone + Send + 'static,
{
    /// Constructs a new `ReaderBuilder` with sequential loading, no data sources, a fresh cache,
    /// and a no-op preprocessor.
    pub fn new() -> Self {
        Self {
            parallel_load: false,
            cache: Cache::new(),
            data: Vec::new(),
            preprocessor: Box::new(NullPreprocessor),
        }
    }

    /// Enables or disables background prefetching of the next data source while the current one
    /// is being consumed.
    pub fn parallel_load(mut self, parallel_load: bool) -> Self {
        self.parallel_load = parallel_load;
        self
    }

    /// Sets the [`Cache`] this `Reader` will share its loaded data through.
    pub fn cache(mut self, cache: Cache<D>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the ordered sequence of data sources to read.
    pub fn data(mut self, data: Vec<DataSource<D>>) -> Self {
        self.data = data;
        self
    }

    /// Sets the preprocessing step applied to each loaded [`Data`] before it is handed out.
    pub fn preprocessor<P>(mut self, preprocessor: P) -> Self
    where
        P: DataPreprocess<D> + 'static,
    {
        self.preprocessor = Box::new(preprocessor);
        self
    }

    /// Consumes the builder and constructs a [`Reader`].
    pub fn build(self) -> Result<Reader<D>, BacktestError> {
        let mut cache = self.cache;
        let mut file_list = Vec::with_capacity(self.data.len());
        let mut preprocessor = self.preprocessor;

        for source in self.data {
            match source {
                DataSource::File(filepath) => file_list.push(filepath),
                DataSource::Data(mut data) => {
                    let id = Uuid::new_v4().to_string();
                    preprocessor
                        .preprocess(&mut data)
                        .map_err(BacktestError::DataError)?;
                    cache.insert(id.clone(), data);
                    file_list.push(id);
                }
            }
        }

        if self.parallel_load {
            let (tx, rx) = channel();
            Ok(Reader(ReaderImpl::Parallel(Parallel {
                file_list,
                cache,
                data_num: 0,
                tx,
                rx: Rc::new(rx),
            })))
        } else {
            Ok(Reader(ReaderImpl::Sequential(Sequential {
                file_list,
                cache,
                data_num: 0,
                preprocessor,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Event;

    #[test]
    fn sequential_reader_reads_in_memory_data_in_order() {
        let e1 = Event {
            ev: 0,
            exch_ts: 1,
            local_ts: 1,
            px: 1.0,
            qty: 1.0,
            order_id: 0,
            ival: 0,
            fval: 0.0,
        };
        let e2 = Event {
            ev: 0,
            exch_ts: 2,
            local_ts: 2,
            px: 2.0,
            qty: 2.0,
            order_id: 0,
            ival: 0,
            fval: 0.0,
        };
        let d1 = Data::from_data(&[e1]);
        let d2 = Data::from_data(&[e2]);

        let mut reader = Reader::builder()
            .data(vec![DataSource::Data(d1), DataSource::Data(d2)])
            .build()
            .unwrap();

        let first = reader.next_data().unwrap();
        assert_eq!(first[0].px, 1.0);
        let second = reader.next_data().unwrap();
        assert_eq!(second[0].px, 2.0);
        assert!(matches!(reader.next_data(), Err(BacktestError::EndOfData)));
    }
}
