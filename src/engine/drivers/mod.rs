// Engine drivers, one per supported database family

pub mod mongodb;
pub mod mysql;
pub mod postgres;

pub use self::mongodb::MongoDriver;
pub use self::mysql::MySqlDriver;
pub use self::postgres::PostgresDriver;
