mod client;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, DriveFile, FileList, FOLDER_MIME_TYPE, Owner,
    SHORTCUT_MIME_TYPE, ShortcutDetails,
};
