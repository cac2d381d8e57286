//! Mock version of the people writer
use mockall::mock;

use batch_import::{
    core::item::{ItemWriter, ItemWriterResult},
    people::Person,
};

mock! {
    pub PersonWriter {}
    impl ItemWriter<Person> for PersonWriter {
        fn write(&self, items: &[Person]) -> ItemWriterResult;
        fn flush(&self) -> ItemWriterResult;
        fn open(&self) -> ItemWriterResult;
        fn close(&self) -> ItemWriterResult;
    }
}
