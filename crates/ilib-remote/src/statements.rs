//! SQL and CL text sent to the host over ODBC.
//!
//! Everything here is plain string building so it can be checked without a
//! driver manager. Names are validated before they are spliced into CL, and
//! free text is quoted with embedded apostrophes doubled.

use anyhow::{bail, Result};
use ilib_core::{
    credentials::CredentialsRecord,
    remote::{object_name, SaveFileRequest},
};

/// Library the intermediate save file is created in.
pub const STAGING_LIBRARY: &str = "QGPL";
/// IFS directory the save file is copied to before it is read back.
pub const STAGING_DIR: &str = "/tmp";
/// Chunk size for reading the staged save file.
pub const READ_CHUNK_BYTES: u32 = 1_048_576;

pub const LIST_LIBRARIES: &str =
    "SELECT * FROM TABLE(QSYS2.OBJECT_STATISTICS('*ALLSIMPLE', '*LIB')) L ORDER BY OBJNAME";
pub const LIBRARY_INFO: &str =
    "SELECT * FROM TABLE(QSYS2.OBJECT_STATISTICS('QSYS', '*LIB', ?)) L";
pub const LIST_USERS: &str = "SELECT * FROM QSYS2.USER_INFO ORDER BY AUTHORIZATION_NAME";
pub const USER_INFO: &str = "SELECT * FROM QSYS2.USER_INFO WHERE AUTHORIZATION_NAME = ?";
/// Runs one CL command; the command text is the only parameter.
pub const RUN_COMMAND: &str = "CALL QSYS2.QCMDEXC(?)";

/// Reads a stream file back in ordered binary chunks.
pub fn read_stream_file() -> String {
    format!(
        "SELECT LINE FROM TABLE(QSYS2.IFS_READ_BINARY(PATH_NAME => ?, \
         MAXIMUM_LINE_LENGTH => {READ_CHUNK_BYTES}, END_OF_LINE => 'NONE')) F \
         ORDER BY LINE_NUMBER"
    )
}

/// `DRIVER=..;SYSTEM=..;UID=..;PWD=..;` with values braced where needed.
pub fn connection_string(creds: &CredentialsRecord) -> String {
    let driver = creds.driver.trim();
    // The stored driver name is usually already braced.
    let driver = driver
        .strip_prefix('{')
        .and_then(|d| d.strip_suffix('}'))
        .unwrap_or(driver);
    format!(
        "DRIVER={{{}}};SYSTEM={};UID={};PWD={};",
        driver.replace('}', "}}"),
        attribute(creds.host.trim()),
        attribute(&creds.username),
        attribute(&creds.password),
    )
}

fn attribute(value: &str) -> String {
    let needs_braces = value.is_empty()
        || value.contains([';', '{', '}'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_braces {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

/// CL string literal: wrapped in apostrophes, inner apostrophes doubled.
pub fn cl_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Special values and release levels such as `*CURRENT`, `V7R4M0`, `*EXCLUDE`.
pub fn cl_keyword(raw: &str) -> Result<String> {
    let value = raw.trim().to_ascii_uppercase();
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '*') {
        bail!("invalid CL value {raw:?}");
    }
    Ok(value)
}

/// CL commands for one save-file export, in execution order, plus the
/// stream file the archive ends up in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFilePlan {
    pub save_file: String,
    pub create: String,
    pub save: String,
    pub copy: String,
    pub stream_file: String,
    pub cleanup: Vec<String>,
}

impl SaveFilePlan {
    pub fn new(request: &SaveFileRequest) -> Result<Self> {
        let library = object_name(&request.library)?;
        let save_file = object_name(&request.save_file)?;
        let release = cl_keyword(&request.target_release)?;
        let authority = cl_keyword(&request.authority)?;
        let qualified = format!("{STAGING_LIBRARY}/{save_file}");
        let stream_file = format!("{STAGING_DIR}/{save_file}.savf");

        Ok(Self {
            create: format!(
                "CRTSAVF FILE({qualified}) AUT({authority}) TEXT({})",
                cl_quote(&request.description)
            ),
            save: format!("SAVLIB LIB({library}) DEV(*SAVF) SAVF({qualified}) TGTRLS({release})"),
            copy: format!(
                "CPYTOSTMF FROMMBR('/QSYS.LIB/{STAGING_LIBRARY}.LIB/{save_file}.FILE') \
                 TOSTMF({}) STMFOPT(*REPLACE) CVTDTA(*NONE)",
                cl_quote(&stream_file)
            ),
            cleanup: vec![
                format!("RMVLNK OBJLNK({})", cl_quote(&stream_file)),
                format!("DLTF FILE({qualified})"),
            ],
            stream_file,
            save_file,
        })
    }

    /// Commands that must all succeed before the stream file is read.
    pub fn steps(&self) -> [&str; 3] {
        [&self.create, &self.save, &self.copy]
    }
}

/// Break message to one user profile.
pub fn send_message(user: &str, text: &str) -> Result<String> {
    let user = object_name(user)?;
    Ok(format!("SNDMSG MSG({}) TOUSR({user})", cl_quote(text)))
}
